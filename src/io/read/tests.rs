// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::Write;

use approx::assert_abs_diff_eq;
use ndarray::prelude::*;
use tempfile::{NamedTempFile, TempDir};

use super::*;
use crate::tests::{synthetic_observation, SyntheticSubint};

fn write_archive(obs: &Observation) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    serde_json::to_writer(&mut file, &JsonArchive::from(obs)).unwrap();
    file.flush().unwrap();
    file
}

fn three_subints() -> Observation {
    synthetic_observation(
        64,
        8,
        &[
            SyntheticSubint::default(),
            SyntheticSubint {
                amplitude: 2.0,
                ..Default::default()
            },
            SyntheticSubint {
                amplitude: 3.0,
                ..Default::default()
            },
        ],
        1,
    )
}

#[test]
fn test_read_json_archive() {
    let obs = three_subints();
    let file = write_archive(&obs);
    let loaded = JsonArchiveReader
        .load(file.path(), &LoadOptions::default())
        .unwrap();

    assert_eq!(loaded.source, obs.source);
    assert_eq!(loaded.telescope_code, "1");
    assert_eq!(loaded.nbin, 64);
    assert_eq!(loaded.nchan, 8);
    assert_eq!(loaded.subints.len(), 3);
    assert!(!loaded.dedispersed);
    for (l, o) in loaded.subints.iter().zip(obs.subints.iter()) {
        assert!((l.epoch - o.epoch).to_seconds().abs() < 1e-4);
        assert_abs_diff_eq!(l.freqs, o.freqs, epsilon = 1e-9);
        assert_abs_diff_eq!(l.portrait, o.portrait, epsilon = 1e-12);
        // Stored statistics are kept.
        assert_abs_diff_eq!(l.snrs, o.snrs, epsilon = 1e-9);
        assert_abs_diff_eq!(l.noise_stds, o.noise_stds, epsilon = 1e-12);
        assert_eq!(l.ok_chans, (0..8).collect::<Vec<_>>());
    }
    let expected_snr = obs
        .subints
        .iter()
        .map(|s| s.snrs.mapv(|x| x * x).sum())
        .sum::<f64>()
        .sqrt();
    assert_abs_diff_eq!(loaded.prof_snr, expected_snr, epsilon = 1e-9);
}

#[test]
fn test_missing_statistics_are_estimated() {
    let obs = synthetic_observation(
        512,
        4,
        &[SyntheticSubint {
            noise: 0.05,
            add_noise: true,
            ..Default::default()
        }],
        7,
    );
    let mut archive = JsonArchive::from(&obs);
    archive.subints[0].noise_stds = None;
    archive.subints[0].snrs = None;
    archive.subints[0].weights[2] = 0.0;
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    serde_json::to_writer(&mut file, &archive).unwrap();
    file.flush().unwrap();

    let loaded = JsonArchiveReader
        .load(file.path(), &LoadOptions::default())
        .unwrap();
    let subint = &loaded.subints[0];
    for &noise in subint.noise_stds.iter() {
        assert_abs_diff_eq!(noise, 0.05, epsilon = 0.01);
    }
    for (&est, &truth) in subint.snrs.iter().zip(obs.subints[0].snrs.iter()) {
        assert_abs_diff_eq!(est, truth, epsilon = 0.2 * truth);
    }
    assert_eq!(subint.ok_chans, vec![0, 1, 3]);
}

#[test]
fn test_bad_archives() {
    let obs = three_subints();

    let mut archive = JsonArchive::from(&obs);
    archive.subints[1].portrait.pop();
    let err = archive.into_observation("bad.json").unwrap_err();
    assert!(matches!(
        err,
        ArchiveReadError::BadShape {
            subint: 1,
            what: "portrait rows",
            expected: 8,
            got: 7,
            ..
        }
    ));

    let mut archive = JsonArchive::from(&obs);
    archive.subints[0].portrait[3].push(0.0);
    let err = archive.into_observation("bad.json").unwrap_err();
    assert!(matches!(err, ArchiveReadError::BadShape { what: "phase bins", .. }));

    let mut archive = JsonArchive::from(&obs);
    archive.subints.clear();
    assert!(matches!(
        archive.into_observation("bad.json"),
        Err(ArchiveReadError::NoSubints { .. })
    ));

    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(file, "{{\"source\": \"J0000+0000\"").unwrap();
    file.flush().unwrap();
    let result = JsonArchiveReader.load(file.path(), &LoadOptions::default());
    assert!(matches!(result, Err(ArchiveReadError::Parse { .. })));

    let result = JsonArchiveReader.load(Path::new("/does/not/exist.json"), &LoadOptions::default());
    assert!(matches!(result, Err(ArchiveReadError::BadFile(_))));
}

#[test]
fn test_dedispersion_round_trip() {
    let obs = three_subints();
    let file = write_archive(&obs);
    let dedispersed = JsonArchiveReader
        .load(
            file.path(),
            &LoadOptions {
                dedisperse: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert!(dedispersed.dedispersed);
    assert!((&dedispersed.subints[0].portrait - &obs.subints[0].portrait)
        .iter()
        .any(|x| x.abs() > 1e-3));

    // Reloading a dedispersed archive with the delays restored gets back the
    // original data.
    let file = write_archive(&dedispersed);
    let restored = JsonArchiveReader
        .load(
            file.path(),
            &LoadOptions {
                dededisperse: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert!(!restored.dedispersed);
    for (r, o) in restored.subints.iter().zip(obs.subints.iter()) {
        assert_abs_diff_eq!(r.portrait, o.portrait, epsilon = 1e-10);
    }
}

#[test]
fn test_scrunching() {
    let obs = three_subints();
    let file = write_archive(&obs);
    let options = LoadOptions {
        tscrunch: true,
        ..Default::default()
    };
    let loaded = JsonArchiveReader.load(file.path(), &options).unwrap();
    assert_eq!(loaded.subints.len(), 1);
    let subint = &loaded.subints[0];
    assert_abs_diff_eq!(subint.duration, 180.0);
    assert_abs_diff_eq!(subint.weights, Array1::from_elem(8, 3.0));
    // The subints are 60 s apart, so the middle one is the mean epoch.
    assert!((subint.epoch - obs.subints[1].epoch).to_seconds().abs() < 1e-4);
    // Amplitudes 1, 2 and 3 average to 2.
    assert_abs_diff_eq!(subint.portrait, &obs.subints[0].portrait * 2.0, epsilon = 1e-10);

    let options = LoadOptions {
        tscrunch: true,
        fscrunch: true,
        ..Default::default()
    };
    let loaded = JsonArchiveReader.load(file.path(), &options).unwrap();
    assert_eq!(loaded.nchan, 1);
    let subint = &loaded.subints[0];
    assert_eq!(subint.portrait.dim(), (1, 64));
    assert_abs_diff_eq!(subint.freqs[0], 1400.0, epsilon = 1e-9);
    assert_eq!(subint.ok_chans, vec![0]);
    assert!(subint.snrs[0] > 0.0);
}

#[test]
fn test_remove_baseline() {
    let mut obs = three_subints();
    obs.subints[0].portrait += 5.0;
    let file = write_archive(&obs);
    let loaded = JsonArchiveReader
        .load(
            file.path(),
            &LoadOptions {
                remove_baseline: true,
                ..Default::default()
            },
        )
        .unwrap();
    for row in loaded.subints[0].portrait.outer_iter() {
        let min = row.iter().copied().fold(f64::INFINITY, f64::min);
        assert!(min.abs() < 1e-3, "{min}");
    }
}

#[test]
fn test_get_data_files() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("obs.json");
    assert_eq!(get_data_files(&archive).unwrap(), vec![archive.clone()]);

    let list = dir.path().join("archives.txt");
    std::fs::write(
        &list,
        "# data\n/data/a.json\n\n/data/b.json  # second\n",
    )
    .unwrap();
    assert_eq!(
        get_data_files(&list).unwrap(),
        vec![PathBuf::from("/data/a.json"), PathBuf::from("/data/b.json")]
    );

    let empty = dir.path().join("empty.txt");
    std::fs::write(&empty, "# nothing\n").unwrap();
    assert!(matches!(
        get_data_files(&empty),
        Err(ArchiveReadError::EmptyFileList(_))
    ));
    assert!(matches!(
        get_data_files(dir.path().join("missing.txt")),
        Err(ArchiveReadError::BadFile(_))
    ));
}
