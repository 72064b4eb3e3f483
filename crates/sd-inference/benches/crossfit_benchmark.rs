use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use sd_inference::learners::{GradientBoostingParams, LinearParams, RandomForestParams};
use sd_inference::{LearnerSpec, NuisanceConfig, SyntheticConfig, cross_fit, synthetic_data};
use std::hint::black_box;

fn bench_cross_fit_learners(c: &mut Criterion) {
    let data = synthetic_data(&SyntheticConfig {
        n_countries: 40,
        n_months: 24,
        country_dummies: true,
        seed: 7,
        ..Default::default()
    })
    .unwrap();

    let learners = [
        ("linear", LearnerSpec::Linear(LinearParams::default())),
        ("forest", LearnerSpec::RandomForest(RandomForestParams { n_trees: 50, ..Default::default() })),
        ("boosting", LearnerSpec::GradientBoosting(GradientBoostingParams::default())),
    ];

    let mut group = c.benchmark_group("crossfit/n=960");
    group.sample_size(10);
    for (name, spec) in learners {
        for parallel in [false, true] {
            let cfg = NuisanceConfig {
                learner_y: spec.clone(),
                learner_d: spec.clone(),
                parallel,
                ..Default::default()
            };
            group.bench_with_input(
                BenchmarkId::new(name, if parallel { "parallel" } else { "sequential" }),
                &cfg,
                |b, cfg| {
                    b.iter(|| {
                        let res = cross_fit(black_box(&data), black_box(cfg), 42).unwrap();
                        black_box(res.residuals.len());
                    });
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_cross_fit_learners);
criterion_main!(benches);
