use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use qc_core::CurveModel;
use qc_models::spectrum::{ChargeSpectrum, PoissonCounting, VinogradovCounting};

fn bench_counting_models(c: &mut Criterion) {
    c.bench_function("poisson_pmf_20", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for k in 0..20u32 {
                acc += qc_models::poisson::pmf(k, 2.4).unwrap();
            }
            black_box(acc)
        })
    });

    c.bench_function("vinogradov_pmf_20", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for k in 0..20u32 {
                acc += qc_models::vinogradov::pmf(k, 2.4, 0.12).unwrap();
            }
            black_box(acc)
        })
    });
}

fn bench_spectrum_eval(c: &mut Criterion) {
    let params = [7500.0, 0.05, 1.8, 0.82, 0.35, 0.08, 0.1];
    let xs: Vec<f64> = (0..500).map(|i| -0.5 + i as f64 * 0.02).collect();

    c.bench_function("spectrum_poisson_500pts", |b| {
        let curve = ChargeSpectrum::new(&PoissonCounting, 12);
        b.iter(|| {
            let mut acc = 0.0;
            for &x in &xs {
                acc += curve.eval(x, &params).unwrap();
            }
            black_box(acc)
        })
    });

    c.bench_function("spectrum_vinogradov_500pts", |b| {
        let curve = ChargeSpectrum::new(&VinogradovCounting, 12);
        b.iter(|| {
            let mut acc = 0.0;
            for &x in &xs {
                acc += curve.eval(x, &params).unwrap();
            }
            black_box(acc)
        })
    });
}

criterion_group!(benches, bench_counting_models, bench_spectrum_eval);
criterion_main!(benches);
