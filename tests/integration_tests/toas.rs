// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests of making TOAs through the command line.

use tempfile::TempDir;

use crate::{get_cmd_output, path_string, wbtoas, write_files, Files};

#[test]
fn test_help() {
    let cmd = wbtoas().arg("--help").ok();
    assert!(cmd.is_ok());
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("--data"));
    assert!(stdout.contains("--nu-ref"));
}

#[test]
fn test_missing_data_prints_usage() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let Files { model, .. } = write_files(tmp_dir.path());

    let cmd = wbtoas().args(["-m", &model]).ok();
    assert!(cmd.is_err());
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stdout.is_empty());
    assert!(stderr.contains("No data files were specified"), "{stderr}");
    assert!(stderr.contains("USAGE"), "{stderr}");

    let cmd = wbtoas().ok();
    assert!(cmd.is_err());
}

#[test]
fn test_missing_model_is_an_error() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let Files { data, .. } = write_files(tmp_dir.path());

    let cmd = wbtoas().args(["-d", &data]).ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("No template was specified"), "{stderr}");
}

#[test]
fn test_wideband_toas_to_file() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let Files { data, model } = write_files(tmp_dir.path());
    let tim = tmp_dir.path().join("toas.tim");
    let errfile = tmp_dir.path().join("dm_errs.txt");

    #[rustfmt::skip]
    let cmd = wbtoas()
        .args([
            "-d", &data,
            "-m", &model,
            "-o", &path_string(tim.clone()),
            "--errfile", &path_string(errfile.clone()),
            "--flags", "pta,test",
            "--no-progress-bars",
        ])
        .ok();
    assert!(cmd.is_ok(), "wbtoas failed: {}", cmd.err().unwrap());
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.is_empty(), "TOAs went to stdout: {stdout}");

    let contents = std::fs::read_to_string(&tim).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "FORMAT 1");
    for line in &lines[1..] {
        assert!(line.starts_with(&data));
        assert!(line.contains(" -pp_dm "));
        assert!(line.contains(" -be GUPPI"));
        assert!(line.contains(&format!(" -tmplt {model} ")));
        assert!(line.contains(" -phi_DM_cov "));
        assert!(!line.contains(" -gm "));
        assert!(line.ends_with("-pta test"));
    }
    assert_eq!(std::fs::read_to_string(&errfile).unwrap().lines().count(), 2);

    // A second run appends without another header.
    #[rustfmt::skip]
    let cmd = wbtoas()
        .args(["-d", &data, "-m", &model, "-o", &path_string(tim.clone())])
        .ok();
    assert!(cmd.is_ok());
    let contents = std::fs::read_to_string(&tim).unwrap();
    assert_eq!(contents.lines().count(), 5);
    assert_eq!(contents.matches("FORMAT 1").count(), 1);
}

#[test]
fn test_toas_to_stdout() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let Files { data, model } = write_files(tmp_dir.path());

    let cmd = wbtoas().args(["-d", &data, "-m", &model]).ok();
    assert!(cmd.is_ok(), "wbtoas failed: {}", cmd.err().unwrap());
    let (stdout, _) = get_cmd_output(cmd);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "FORMAT 1");
}

#[test]
fn test_narrowband_princeton() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let Files { data, model } = write_files(tmp_dir.path());

    let cmd = wbtoas()
        .args(["-d", &data, "-m", &model, "--narrowband", "-f", "princeton"])
        .ok();
    assert!(cmd.is_ok(), "wbtoas failed: {}", cmd.err().unwrap());
    let (stdout, _) = get_cmd_output(cmd);
    let lines: Vec<&str> = stdout.lines().collect();
    // 2 subints of 8 channels.
    assert_eq!(lines.len(), 16);
    assert!(lines.iter().all(|l| l.len() == 78));
}

#[test]
fn test_snr_cut_filters_toas() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let Files { data, model } = write_files(tmp_dir.path());

    let cmd = wbtoas()
        .args(["-d", &data, "-m", &model, "--snr-cut", "1e9"])
        .ok();
    assert!(cmd.is_ok(), "wbtoas failed: {}", cmd.err().unwrap());
    let (stdout, _) = get_cmd_output(cmd);
    assert_eq!(stdout.lines().collect::<Vec<_>>(), vec!["FORMAT 1"]);
}

#[test]
fn test_dry_run_and_save_toml() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let Files { data, model } = write_files(tmp_dir.path());
    let tim = tmp_dir.path().join("toas.tim");
    let toml = tmp_dir.path().join("args.toml");

    #[rustfmt::skip]
    let cmd = wbtoas()
        .args([
            "-d", &data,
            "-m", &model,
            "-o", &path_string(tim.clone()),
            "--one-DM",
            "--dry-run",
            "--save-toml", &path_string(toml.clone()),
        ])
        .ok();
    assert!(cmd.is_ok(), "wbtoas failed: {}", cmd.err().unwrap());
    assert!(!tim.exists());

    let saved = std::fs::read_to_string(&toml).unwrap();
    assert!(saved.contains("one_dm = true"));
    assert!(saved.contains(&model));

    // The saved arguments reproduce the run.
    let cmd = wbtoas().arg(path_string(toml)).ok();
    assert!(cmd.is_ok(), "wbtoas failed: {}", cmd.err().unwrap());
    let contents = std::fs::read_to_string(&tim).unwrap();
    assert_eq!(contents.lines().count(), 3);
    assert!(contents.contains("-DM_mean True"));
}

#[test]
fn test_bad_format_is_an_error() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let Files { data, model } = write_files(tmp_dir.path());

    let cmd = wbtoas()
        .args(["-d", &data, "-m", &model, "-f", "tempo3"])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("tempo3"), "{stderr}");
}
