// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;
use ndarray::prelude::*;

use super::*;

fn gaussian_profile(nbin: usize, loc: f64, fwhm: f64) -> Array1<f64> {
    Array1::from_shape_fn(nbin, |i| {
        let x = (i as f64 + 0.5) / nbin as f64 - loc;
        (-4.0 * std::f64::consts::LN_2 * (x / fwhm).powi(2)).exp()
    })
}

#[test]
fn test_wrap_phase() {
    assert_abs_diff_eq!(wrap_phase(0.25), 0.25);
    assert_abs_diff_eq!(wrap_phase(0.75), -0.25);
    assert_abs_diff_eq!(wrap_phase(-0.5), -0.5);
    assert_abs_diff_eq!(wrap_phase(0.5), -0.5);
    assert_abs_diff_eq!(wrap_phase(-3.1), -0.1, epsilon = 1e-12);
}

#[test]
fn test_phase_transform_round_trip() {
    let (phi, dm, period) = (0.1234, 56.78, 0.0045);
    let phi2 = phase_transform(phi, dm, 0.0, 1400.0, 1100.0, period, false);
    let phi3 = phase_transform(phi2, dm, 0.0, 1100.0, 1400.0, period, false);
    assert_abs_diff_eq!(phi3, phi, epsilon = 1e-9);

    // The transformed phase matches the dispersive law directly.
    let expected = phi + DCONST * dm / period * (1100.0f64.powi(-2) - 1400.0f64.powi(-2));
    assert_abs_diff_eq!(phi2, expected, epsilon = 1e-9);
}

#[test]
fn test_phase_transform_to_infinite_frequency() {
    let (phi, dm, period) = (0.0, 10.0, 0.01);
    let phi_inf = phase_transform(phi, dm, 0.0, 1000.0, f64::INFINITY, period, false);
    assert_abs_diff_eq!(phi_inf, -DCONST * dm / period * 1e-6, epsilon = 1e-9);
}

#[test]
fn test_phase_transform_wraps() {
    let phi = phase_transform(0.4, 1.0, 0.0, 1400.0, 1000.0, 0.01, true);
    assert!((-0.5..0.5).contains(&phi));
}

#[test]
fn test_guess_fit_freq_uniform() {
    let freqs = array![1000.0, 2000.0];
    let nu = guess_fit_freq(freqs.view(), array![1.0, 1.0].view());
    let expected = (0.5 * (1000.0f64.powi(-2) + 2000.0f64.powi(-2))).powf(-0.5);
    assert_abs_diff_eq!(nu, expected, epsilon = 1e-9);
}

#[test]
fn test_guess_fit_freq_favours_high_snr() {
    let freqs = array![1000.0, 1500.0, 2000.0];
    let nu = guess_fit_freq(freqs.view(), array![1.0, 1.0, 100.0].view());
    assert!(nu > 1900.0 && nu < 2000.0);
}

#[test]
fn test_guess_fit_freq_ignores_nan() {
    let freqs = array![1000.0, 1500.0];
    let nu = guess_fit_freq(freqs.view(), array![f64::NAN, f64::NAN].view());
    let expected = (0.5 * (1000.0f64.powi(-2) + 1500.0f64.powi(-2))).powf(-0.5);
    assert_abs_diff_eq!(nu, expected, epsilon = 1e-9);
}

#[test]
fn test_weighted_mean() {
    let (mean, err) = weighted_mean(array![1.0, 3.0].view(), array![1.0, 1.0].view());
    assert_abs_diff_eq!(mean, 2.0);
    assert_abs_diff_eq!(err, 0.5f64.sqrt());

    let (mean, _) = weighted_mean(array![1.0, 3.0].view(), array![1.0, 0.5].view());
    assert_abs_diff_eq!(mean, (1.0 + 4.0 * 3.0) / 5.0);
}

#[test]
fn test_median() {
    assert_eq!(median(&[]), None);
    assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
    assert_eq!(median(&[4.0, 1.0, f64::NAN, 2.0, 3.0]), Some(2.5));
}

#[test]
fn test_fft_round_trip() {
    for nbin in [64, 65] {
        let fft = RealFft::new(nbin);
        let profile = gaussian_profile(nbin, 0.3, 0.05);
        let spectrum = fft.forward(profile.view());
        assert_eq!(spectrum.len(), fft.num_harmonics());
        let back = fft.inverse(spectrum.view());
        assert_abs_diff_eq!(back, profile, epsilon = 1e-12);
    }
}

#[test]
fn test_rotate_profile_by_whole_bins() {
    let nbin = 128;
    let fft = RealFft::new(nbin);
    let profile = gaussian_profile(nbin, 64.5 / nbin as f64, 0.05);
    // Advancing by 16 bins moves the peak from bin 64 to bin 48.
    let rotated = rotate_profile(&fft, profile.view(), 16.0 / nbin as f64);
    let peak = rotated
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap();
    assert_eq!(peak, 48);
    assert_abs_diff_eq!(rotated[48], profile[64], epsilon = 1e-9);
}

#[test]
fn test_rotate_portrait_removes_dispersion() {
    let nbin = 256;
    let fft = RealFft::new(nbin);
    let freqs = array![1200.0, 1400.0, 1600.0];
    let (dm, period, nu_ref) = (3.0, 0.01, 1400.0);
    let profile = gaussian_profile(nbin, 0.5, 0.04);
    let template = Array2::from_shape_fn((3, nbin), |(_, j)| profile[j]);

    // Delay each channel by its dispersive delay.
    let mut spectra = fft.forward_rows(template.view());
    let phases = channel_phases(0.0, dm, 0.0, freqs.view(), nu_ref, period);
    for (mut row, phi) in spectra.outer_iter_mut().zip(phases.iter()) {
        shift_spectrum(row.view_mut(), *phi);
    }
    let dispersed = fft.inverse_rows(spectra.view());

    let dedispersed = rotate_portrait(&fft, dispersed.view(), 0.0, dm, period, freqs.view(), nu_ref);
    assert_abs_diff_eq!(dedispersed, template, epsilon = 1e-9);
}

#[test]
fn test_noise_and_snr_estimates() {
    use rand::prelude::*;
    use rand_distr::Normal;

    let nbin = 1024;
    let fft = RealFft::new(nbin);
    let mut rng = StdRng::seed_from_u64(1234);
    let normal = Normal::new(0.0, 0.1).unwrap();
    let noise = Array1::from_shape_fn(nbin, |_| normal.sample(&mut rng));
    let sigma = get_noise(&fft, noise.view());
    assert_abs_diff_eq!(sigma, 0.1, epsilon = 0.02);

    let profile = gaussian_profile(nbin, 0.5, 0.02) + &noise;
    let snr = get_snr(&fft, profile.view(), 0.1);
    // The matched-filter SNR of a unit Gaussian with this width.
    let signal = gaussian_profile(nbin, 0.5, 0.02);
    let mean = signal.mean().unwrap();
    let ideal = signal.mapv(|x| (x - mean).powi(2)).sum().sqrt() / 0.1;
    assert!((snr - ideal).abs() / ideal < 0.1, "{snr} vs {ideal}");

    assert!(get_snr(&fft, profile.view(), 0.0).is_nan());
}
