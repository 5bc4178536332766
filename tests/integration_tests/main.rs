// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Integration tests.
//!
//! Some help for laying out these tests was taken from:
//! https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod toas;

use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    process::Output,
    str::from_utf8,
};

use assert_cmd::{output::OutputError, Command};
use indoc::indoc;
use serde_json::json;

fn wbtoas() -> Command {
    Command::cargo_bin("wbtoas").unwrap()
}

fn get_cmd_output(result: Result<Output, OutputError>) -> (String, String) {
    let output = match result {
        Ok(o) => o,
        Err(o) => o.as_output().unwrap().clone(),
    };
    (
        from_utf8(&output.stdout).unwrap().to_string(),
        from_utf8(&output.stderr).unwrap().to_string(),
    )
}

const GMODEL: &str = indoc! {"
    # One Gaussian component that narrows with frequency
    MODEL   J0000+0000
    CODE    000
    FREQ    1400.0
    DC      0.0 0
    TAU     0.0 0
    ALPHA   -4.0 0
    COMP01  0.50 1  0.0 0  0.040 1  -0.2 1  1.0 1  -1.0 1
"};

const NBIN: usize = 128;
const NCHAN: usize = 8;
const PERIOD: f64 = 0.1;
const DM: f64 = 2.0;
const DCONST: f64 = 1.0 / 2.41e-4;

struct Files {
    data: String,
    model: String,
}

/// The profile of the template component at `freq`, delayed by `phase`.
fn profile(freq: f64, phase: f64, amplitude: f64) -> Vec<f64> {
    let fwhm = 0.04 * (freq / 1400.0).powf(-0.2);
    let amp = amplitude * (freq / 1400.0).powf(-1.0);
    (0..NBIN)
        .map(|i| {
            let mut x = i as f64 / NBIN as f64 - 0.5 - phase;
            x -= x.round();
            amp * (-4.0 * std::f64::consts::LN_2 * (x / fwhm).powi(2)).exp()
        })
        .collect()
}

/// Write a dispersed two-subint archive and a Gaussian template.
fn write_files(dir: &Path) -> Files {
    let freqs: Vec<f64> = (0..NCHAN).map(|i| 1225.0 + 50.0 * i as f64).collect();
    let subints: Vec<_> = [1.0, 3.0]
        .iter()
        .enumerate()
        .map(|(i, &amplitude)| {
            let portrait: Vec<Vec<f64>> = freqs
                .iter()
                .map(|&f| profile(f, 0.1 + DCONST * DM / (f * f) / PERIOD, amplitude))
                .collect();
            json!({
                "imjd": 58000,
                "fmjd": 0.25 + i as f64 * 60.0 / 86400.0,
                "period": PERIOD,
                "duration": 60.0,
                "freqs": freqs,
                "weights": vec![1.0; NCHAN],
                "portrait": portrait,
                "noise_stds": vec![0.01; NCHAN],
                "snrs": vec![100.0 * amplitude; NCHAN],
            })
        })
        .collect();
    let archive = json!({
        "source": "J0000+0000",
        "telescope": "GBT",
        "telescope_code": "1",
        "backend": "GUPPI",
        "frontend": "Rcvr1_2",
        "nbin": NBIN,
        "nchan": NCHAN,
        "bandwidth": 400.0,
        "centre_freq": 1400.0,
        "dm": DM,
        "subints": subints,
    });

    let data = dir.join("J0000+0000.json");
    let mut f = File::create(&data).unwrap();
    serde_json::to_writer(&mut f, &archive).unwrap();
    f.flush().unwrap();

    let model = dir.join("J0000+0000.gmodel");
    let mut f = File::create(&model).unwrap();
    f.write_all(GMODEL.as_bytes()).unwrap();
    f.flush().unwrap();

    Files {
        data: data.display().to_string(),
        model: model.display().to_string(),
    }
}

fn path_string(p: PathBuf) -> String {
    p.display().to_string()
}
