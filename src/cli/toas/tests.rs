// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

use approx::assert_abs_diff_eq;
use clap::Parser;
use indoc::indoc;
use tempfile::TempDir;

use super::*;
use crate::{
    io::read::JsonArchive,
    tests::{synthetic_observation, SyntheticSubint},
};

/// Write a 4-subint data archive and a noiseless template archive.
fn write_fixtures(dir: &Path) -> (PathBuf, PathBuf) {
    let data = synthetic_observation(
        64,
        8,
        &[1.0, 2.0, 3.0, 4.0].map(|amplitude| SyntheticSubint {
            amplitude,
            add_noise: true,
            ..Default::default()
        }),
        7,
    );
    let template = synthetic_observation(
        64,
        8,
        &[SyntheticSubint {
            phi: 0.0,
            ..Default::default()
        }],
        7,
    );

    let data_path = dir.join("data.json");
    let template_path = dir.join("template.json");
    for (path, obs) in [(&data_path, &data), (&template_path, &template)] {
        let mut f = File::create(path).unwrap();
        serde_json::to_writer(&mut f, &JsonArchive::from(obs)).unwrap();
        f.flush().unwrap();
    }
    (data_path, template_path)
}

fn s(p: &Path) -> String {
    p.display().to_string()
}

#[test]
fn test_missing_files_are_errors() {
    let tmp_dir = TempDir::new().unwrap();
    let (data, model) = write_fixtures(tmp_dir.path());

    let args = ToaArgs::parse_from(["wbtoas", "-m", &s(&model)]);
    assert!(matches!(args.parse(), Err(ToaArgsError::NoData)));

    let args = ToaArgs::parse_from(["wbtoas", "-d", &s(&data)]);
    assert!(matches!(args.parse(), Err(ToaArgsError::NoModel)));

    let missing = tmp_dir.path().join("missing.json");
    let args = ToaArgs::parse_from(["wbtoas", "-d", &s(&missing), "-m", &s(&model)]);
    assert!(matches!(
        args.parse(),
        Err(ToaArgsError::ArchiveRead(ArchiveReadError::BadFile(_)))
    ));

    let args = ToaArgs::parse_from(["wbtoas", "-d", &s(&data), "-m", &s(&missing)]);
    assert!(matches!(
        args.parse(),
        Err(ToaArgsError::Template(TemplateError::BadFile(_)))
    ));

    // Missing files are usage errors.
    let e = WbtoasError::from(ToaArgsError::NoData);
    assert!(matches!(e, WbtoasError::Usage(_)));
}

#[test]
fn test_arguments_become_options() {
    let tmp_dir = TempDir::new().unwrap();
    let (data, model) = write_fixtures(tmp_dir.path());
    let out = tmp_dir.path().join("out.tim");

    #[rustfmt::skip]
    let args = ToaArgs::parse_from([
        "wbtoas",
        "-d", &s(&data),
        "-m", &s(&model),
        "-o", &s(&out),
        "-f", "princeton",
        "--snr-cut", "5",
        "--fix-DM",
        "--fit-dt4",
        "--fit-scat",
        "--no-logscat",
        "--scat-guess", "0.001,1400,-4.4",
        "--nu-ref", "inf",
        "--nu-tau", "1500",
        "--DM", "29.5",
        "--no-bary",
        "--flags", "pta,NANOGrav,-grp,L-wide",
        "--method", "TNC",
    ]);
    let params = args.parse().unwrap();

    assert_eq!(params.data_files.len(), 1);
    assert_eq!(params.output, ToaOutput::File(out));
    assert_eq!(params.tim_options.format, TimFormat::Princeton);
    assert_abs_diff_eq!(params.tim_options.snr_cut, 5.0);

    let o = &params.options;
    assert!(!o.fit_dm);
    assert!(o.fit_gm);
    assert!(o.fit_scat);
    assert!(!o.log10_tau);
    assert!(!o.bary);
    assert_eq!(o.nu_ref_dm, Some(f64::INFINITY));
    assert_eq!(o.nu_ref_tau, Some(1500.0));
    assert_eq!(o.dm0, Some(29.5));
    assert_eq!(o.method, FitMethod::Tnc);
    assert_eq!(
        o.scat_guess,
        Some(ScatteringTriple {
            tau: 0.001,
            ref_freq: 1400.0,
            alpha: -4.4
        })
    );
    assert_eq!(
        o.extra_flags.iter().collect::<Vec<_>>(),
        vec![
            (&"pta".to_string(), &"NANOGrav".to_string()),
            (&"grp".to_string(), &"L-wide".to_string())
        ]
    );
    assert!(o.zap.is_none());
    assert!(o.instrumental_response.is_none());
}

#[test]
fn test_defaults() {
    let tmp_dir = TempDir::new().unwrap();
    let (data, model) = write_fixtures(tmp_dir.path());

    let params = ToaArgs::parse_from(["wbtoas", "-d", &s(&data), "-m", &s(&model)])
        .parse()
        .unwrap();
    assert_eq!(params.output, ToaOutput::Stdout);
    assert_eq!(params.tim_options.format, TimFormat::Ipta);
    assert_abs_diff_eq!(params.tim_options.snr_cut, DEFAULT_SNR_CUT);
    assert!(params.options.fit_dm);
    assert!(params.options.bary);
    assert!(params.options.log10_tau);
    assert_eq!(params.options.method, FitMethod::TrustNcg);
    assert!(!params.one_dm);
}

#[test]
fn test_zapping_and_response_arguments() {
    let tmp_dir = TempDir::new().unwrap();
    let (data, model) = write_fixtures(tmp_dir.path());
    let zap = tmp_dir.path().join("zap.txt");

    #[rustfmt::skip]
    let params = ToaArgs::parse_from([
        "wbtoas",
        "-d", &s(&data),
        "-m", &s(&model),
        "--zap-output", &s(&zap),
        "--zap-rchi2", "2.0",
        "--no-zap-iterate",
        "--response-dm", "30",
        "--response-widths", "0.01,0.02",
        "--response-kinds", "boxcar,gaussian",
    ])
    .parse()
    .unwrap();

    assert_eq!(
        params.options.zap,
        Some(ZapCriteria {
            snr_threshold: DEFAULT_ZAP_SNR_THRESHOLD,
            red_chi2_threshold: 2.0,
            iterate: false,
        })
    );
    assert_eq!(params.zap_output, Some(zap));
    assert_eq!(
        params.options.instrumental_response,
        Some(InstrumentalResponse {
            dm: 30.0,
            widths: vec![0.01, 0.02],
            kinds: vec![ResponseKind::Boxcar, ResponseKind::Gaussian],
        })
    );
}

#[test]
fn test_bad_arguments() {
    let tmp_dir = TempDir::new().unwrap();
    let (data, model) = write_fixtures(tmp_dir.path());
    let (data, model) = (s(&data), s(&model));
    let parse = |extra: &[&str]| {
        let mut args = vec!["wbtoas", "-d", &data, "-m", &model];
        args.extend_from_slice(extra);
        ToaArgs::parse_from(args).parse()
    };

    assert!(matches!(
        parse(&["-f", "tempo3"]),
        Err(ToaArgsError::BadFormat(_))
    ));
    assert!(matches!(
        parse(&["--method", "simplex"]),
        Err(ToaArgsError::BadMethod(_))
    ));
    assert!(matches!(
        parse(&["--scat-guess", "0.001,1400"]),
        Err(ToaArgsError::BadScatGuess(2))
    ));
    assert!(matches!(
        parse(&["--flags", "pta,NANOGrav,grp"]),
        Err(ToaArgsError::OddFlags(3))
    ));
    assert!(matches!(
        parse(&["--response-widths", "0.01", "--response-kinds", "triangle"]),
        Err(ToaArgsError::BadResponseKind(_))
    ));
    assert!(matches!(
        parse(&["--response-widths", "0.01,0.02", "--response-kinds", "boxcar"]),
        Err(ToaArgsError::ResponseLengths { widths: 2, kinds: 1 })
    ));
}

#[test]
fn test_too_many_archives_is_fatal() {
    let tmp_dir = TempDir::new().unwrap();
    let (_, model) = write_fixtures(tmp_dir.path());
    let list = tmp_dir.path().join("archives.txt");
    let mut f = File::create(&list).unwrap();
    for i in 0..MAX_NUM_ARCHIVES + 1 {
        writeln!(f, "archive_{i}.json").unwrap();
    }
    f.flush().unwrap();

    let result = ToaArgs::parse_from(["wbtoas", "-d", &s(&list), "-m", &s(&model)]).parse();
    assert!(matches!(
        result,
        Err(ToaArgsError::TooManyArchives { num: 1000, max: 999 })
    ));
}

#[test]
fn test_arg_file_is_overridden_by_cli() {
    let tmp_dir = TempDir::new().unwrap();
    let (data, model) = write_fixtures(tmp_dir.path());
    let arg_file = tmp_dir.path().join("args.toml");
    let mut f = File::create(&arg_file).unwrap();
    write!(
        f,
        indoc! {r#"
            data = ["{}"]
            model = "{}"
            format = "princeton"
            snr_cut = 3.0
            fit_scat = true
        "#},
        s(&data),
        s(&model)
    )
    .unwrap();
    f.flush().unwrap();

    let args = ToaArgs::parse_from(["wbtoas", &s(&arg_file), "-f", "ipta"])
        .merge()
        .unwrap();
    assert_eq!(args.data, Some(vec![data]));
    assert_eq!(args.model, Some(model));
    assert_eq!(args.format.as_deref(), Some("ipta"));
    assert_eq!(args.snr_cut, Some(3.0));
    assert!(args.fit_scat);
    assert!(args.args_file.is_none());

    // Unknown extensions are rejected.
    let bad = tmp_dir.path().join("args.yaml");
    File::create(&bad).unwrap();
    assert!(matches!(
        ToaArgs::parse_from(["wbtoas", &s(&bad)]).merge(),
        Err(WbtoasError::ArgFile(_))
    ));
}

#[test]
fn test_dry_run_returns_early() {
    let tmp_dir = TempDir::new().unwrap();
    let (data, model) = write_fixtures(tmp_dir.path());
    let out = tmp_dir.path().join("toas.tim");
    let errfile = tmp_dir.path().join("dm_errs.txt");

    #[rustfmt::skip]
    let args = ToaArgs::parse_from([
        "wbtoas",
        "-d", &s(&data),
        "-m", &s(&model),
        "-o", &s(&out),
        "--errfile", &s(&errfile),
    ]);
    assert!(args.clone().run(true).is_ok());
    assert!(!out.exists());

    assert!(args.run(false).is_ok());
    let contents = std::fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines[0], "FORMAT 1");
    assert_eq!(lines.len(), 5);
    assert!(lines[1..].iter().all(|l| l.contains("-pp_dm ")));
    let errs = std::fs::read_to_string(&errfile).unwrap();
    assert_eq!(errs.lines().count(), 4);
}
