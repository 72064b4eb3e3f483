//! End-to-end recovery, coverage and placebo checks on synthetic panels.

use sd_inference::{
    ClusterVar, DmlConfig, FoldStrategy, NuisanceConfig, PlaceboConfig, PlaceboKind, Reference, SeKind,
    SyntheticConfig, estimate_dml, run_placebo, stats, synthetic_data,
};

#[test]
fn test_recovers_effect_on_small_panel() {
    // 3 countries × 4 months, treatment loads on the country offset.
    let cfg = SyntheticConfig {
        n_countries: 3,
        n_months: 4,
        noise_sd: 0.1,
        treatment_country_loading: 1.0,
        country_dummies: true,
        seed: 11,
        ..Default::default()
    };
    let data = synthetic_data(&cfg).unwrap();
    assert_eq!(data.n(), 12);
    assert_eq!(data.cluster, ClusterVar::Country);

    let config = DmlConfig {
        nuisance: NuisanceConfig { folds: 4, strategy: FoldStrategy::Stratified, ..Default::default() },
        seed: 3,
        ..Default::default()
    };
    let fit = estimate_dml(&data, &config).unwrap();
    assert!((fit.estimate.theta - 2.0).abs() <= 0.2, "theta = {}", fit.estimate.theta);
    assert_eq!(fit.estimate.se_kind, SeKind::Clustered);
    assert_eq!(fit.estimate.n_clusters, Some(3));
}

#[test]
fn test_residuals_are_centered() {
    let data = synthetic_data(&SyntheticConfig { n_countries: 30, n_months: 12, seed: 5, ..Default::default() }).unwrap();
    let fit = estimate_dml(&data, &DmlConfig::default()).unwrap();
    let cf = &fit.repetitions[0].crossfit;
    assert_eq!(cf.residuals.len(), data.n());
    for v in [
        cf.residuals.iter().map(|r| r.y_res).collect::<Vec<_>>(),
        cf.residuals.iter().map(|r| r.d_res).collect::<Vec<_>>(),
    ] {
        assert!(stats::mean(&v).abs() < 0.25 * stats::sample_sd(&v));
    }
}

#[test]
fn test_interval_coverage_over_repeated_panels() {
    // 30 countries × 12 months, treatment independent of the country offset,
    // which stays in the error term and is absorbed by the clustered SE.
    let config = DmlConfig {
        nuisance: NuisanceConfig { folds: 5, strategy: FoldStrategy::Random, ..Default::default() },
        ..Default::default()
    };
    let mut covered = 0;
    for draw in 0..300u64 {
        let data = synthetic_data(&SyntheticConfig {
            n_countries: 30,
            n_months: 12,
            seed: 1_000 + draw,
            ..Default::default()
        })
        .unwrap();
        let fit = estimate_dml(&data, &DmlConfig { seed: draw, ..config.clone() }).unwrap();
        assert_eq!(fit.estimate.reference, Reference::StudentT);
        if fit.estimate.covers(2.0) {
            covered += 1;
        }
    }
    // At least 94 %.
    assert!(covered >= 282, "95% interval covered 2.0 in {covered}/300 panels");
}

#[test]
fn test_null_effect_sits_inside_placebo_distribution() {
    // Treatment independent of everything, so the real estimate and the
    // permuted ones are exchangeable under the null.
    let dml = DmlConfig::default();
    let placebo = PlaceboConfig { kind: PlaceboKind::Permutation, draws: 40, ..Default::default() };
    let mut inside = 0;
    let mut p_values = Vec::new();
    for seed in 0..20u64 {
        let data = synthetic_data(&SyntheticConfig {
            n_countries: 10,
            n_months: 12,
            theta: 0.0,
            treatment_control_coef: 0.0,
            seed: 200 + seed,
            ..Default::default()
        })
        .unwrap();
        let real = estimate_dml(&data, &dml).unwrap().estimate;
        let s = run_placebo(&data, None, "d", &real, &dml, &placebo).unwrap();
        assert_eq!(s.n_failed, 0);
        if !s.outside_central {
            inside += 1;
        }
        p_values.push(s.p_value);
    }
    assert!(inside >= 16, "null estimate inside the central region in {inside}/20 panels");
    // Roughly uniform p-values.
    let mean_p = stats::mean(&p_values);
    assert!((0.3..=0.7).contains(&mean_p), "mean placebo p-value {mean_p}");
}
