use approx::assert_abs_diff_eq;
use lassosum::blocks::{BlockSource, LdBreakpoints};
use lassosum::config::LassosumConfig;
use lassosum::genotype::{DenseGenotypes, GenotypeService};
use lassosum::pipeline::{PanelSpec, PipelineResult, run_pipeline};
use lassosum::regression::fit_independent;
use lassosum::select::ParticipantFilter;
use lassosum::types::{Marker, SummaryStatistics};
use lassosum::validate::pseudovalidate;
use ndarray::{Array1, Array2, s};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Binomial, Distribution};

const N_MARKERS: usize = 1000;
const PENALTIES: [f64; 5] = [0.05, 0.02, 0.01, 0.005, 0.001];

fn all_markers() -> Vec<Marker> {
    (0..N_MARKERS)
        .map(|i| {
            let (chr, offset) = if i < 500 { ("1", i) } else { ("2", i - 500) };
            Marker::new(chr, (offset as u64 + 1) * 1000, "A", Some("G"))
        })
        .collect()
}

fn breakpoints() -> LdBreakpoints {
    let mut chromosomes = Vec::new();
    let mut positions = Vec::new();
    for chr in ["1", "2"] {
        for k in 0..=10u64 {
            chromosomes.push(chr.to_string());
            positions.push(k * 50_000);
        }
    }
    LdBreakpoints::new(chromosomes, positions).unwrap()
}

fn synthetic_panel(
    id: &str,
    markers: &[Marker],
    participants: usize,
    rng: &mut StdRng,
) -> DenseGenotypes {
    let mut dosages = Array2::<f64>::zeros((participants, markers.len()));
    for mut column in dosages.columns_mut() {
        let frequency = rng.gen_range(0.1..0.5);
        let binomial = Binomial::new(2, frequency).unwrap();
        for value in column.iter_mut() {
            *value = binomial.sample(rng) as f64;
        }
    }
    let ids = (0..participants).map(|i| format!("{id}_{i}")).collect();
    DenseGenotypes::new(id, markers.to_vec(), ids, dosages).unwrap()
}

struct Scenario {
    sumstats: SummaryStatistics,
    reference: DenseGenotypes,
    test: DenseGenotypes,
}

/// 1000 markers, a reference panel covering markers 0..800 and a test panel covering
/// markers 100..1000, so that the panels share 700 markers.
fn scenario() -> Scenario {
    let mut rng = StdRng::seed_from_u64(2024);
    let markers = all_markers();
    let correlations: Vec<f64> = (0..N_MARKERS).map(|_| rng.gen_range(-0.1..0.1)).collect();
    let reference = synthetic_panel("reference", &markers[..800], 200, &mut rng);
    let test = synthetic_panel("test", &markers[100..], 150, &mut rng);
    Scenario {
        sumstats: SummaryStatistics {
            markers,
            correlations,
        },
        reference,
        test,
    }
}

fn config() -> LassosumConfig {
    LassosumConfig {
        shrinkage: vec![0.5, 1.0],
        lambda: PENALTIES.to_vec(),
        ..LassosumConfig::default()
    }
}

fn run(scenario: &Scenario, config: &LassosumConfig) -> PipelineResult {
    let none = ParticipantFilter::default();
    run_pipeline(
        &scenario.sumstats,
        PanelSpec::new(&scenario.reference, &none),
        Some(PanelSpec::new(&scenario.test, &none)),
        &BlockSource::Breakpoints(breakpoints()),
        config,
    )
    .unwrap()
}

#[test]
fn end_to_end_shapes_and_independent_path() {
    let scenario = scenario();
    let result = run(&scenario, &config());

    assert_eq!(result.len(), 900);
    for s in [0.5, 1.0] {
        assert_eq!(result.path(s).unwrap().dim(), (900, 5));
    }
    assert_eq!(result.in_reference().iter().filter(|&&b| b).count(), 700);

    let independent = fit_independent(
        Array1::from(scenario.sumstats.correlations[100..].to_vec()).view(),
        &PENALTIES,
    )
    .unwrap();
    assert_eq!(result.path(1.0).unwrap(), &independent);

    assert_eq!(result.scores().unwrap().dim(), (150, 10));
}

#[test]
fn markers_outside_the_reference_keep_independent_estimates() {
    let scenario = scenario();
    let result = run(&scenario, &config());
    let ld = result.path(0.5).unwrap();
    let independent = result.path(1.0).unwrap();

    // Rows 700..900 are markers 800..1000, absent from the reference panel.
    assert!(result.in_reference()[700..].iter().all(|&b| !b));
    assert_eq!(ld.slice(s![700.., ..]), independent.slice(s![700.., ..]));

    // The LD-aware estimate differs from the independent one somewhere in the
    // shared region.
    assert_ne!(ld.slice(s![..700, ..]), independent.slice(s![..700, ..]));
}

#[test]
fn destandardized_coefficients_scale_inversely_with_sd() {
    let scenario = scenario();
    let result = run(&scenario, &config());
    let sd: Vec<f64> = (0..result.len()).map(|i| 0.5 + (i % 7) as f64 * 0.1).collect();
    let k = 2.5;
    let scaled_sd: Vec<f64> = sd.iter().map(|v| v * k).collect();

    let base = result.destandardize(&sd).unwrap();
    let scaled = result.destandardize(&scaled_sd).unwrap();
    for (a, b) in base.paths().iter().zip(scaled.paths()) {
        for (x, y) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(*y, *x / k, epsilon = 1e-12);
        }
    }
    assert!(base.scores().is_none());
    assert!(base.destandardize(&sd).is_err());
}

#[test]
fn zero_overlap_yields_empty_paths_without_error() {
    let scenario = scenario();
    let mut rng = StdRng::seed_from_u64(5);
    let elsewhere: Vec<Marker> = (0..20)
        .map(|i| Marker::new("9", 10 + i, "C", Some("T")))
        .collect();
    let disjoint = synthetic_panel("elsewhere", &elsewhere, 30, &mut rng);
    let none = ParticipantFilter::default();
    let result = run_pipeline(
        &scenario.sumstats,
        PanelSpec::new(&scenario.reference, &none),
        Some(PanelSpec::new(&disjoint, &none)),
        &BlockSource::Breakpoints(breakpoints()),
        &config(),
    )
    .unwrap();

    assert!(result.is_empty());
    assert!(result.test_mask().iter().all(|&b| !b));
    assert_eq!(result.path(0.5).unwrap().dim(), (0, 5));
    let scores = result.scores().unwrap();
    assert_eq!(scores.dim(), (30, 10));
    assert!(scores.iter().all(|&v| v == 0.0));
}

#[test]
fn pseudovalidation_ranks_every_combination() {
    let scenario = scenario();
    let result = run(&scenario, &config());
    let none = ParticipantFilter::default();
    let validation = pseudovalidate(&result, PanelSpec::new(&scenario.test, &none), true).unwrap();

    assert_eq!(validation.table.len(), 10);
    assert!(validation.best.value.is_finite());
    assert!(
        validation
            .table
            .iter()
            .all(|entry| entry.value <= validation.best.value)
    );
    assert_eq!(validation.best_scores.len(), 150);
    assert_eq!(validation.best_beta.len(), 900);
}

#[test]
fn reference_participant_filter_only_changes_ld_estimates() {
    let scenario = scenario();
    let keep: Vec<String> = scenario
        .reference
        .participant_ids()
        .iter()
        .take(120)
        .cloned()
        .collect();
    let filter = ParticipantFilter::keep(keep);
    let none = ParticipantFilter::default();
    let filtered = run_pipeline(
        &scenario.sumstats,
        PanelSpec::new(&scenario.reference, &filter),
        Some(PanelSpec::new(&scenario.test, &none)),
        &BlockSource::Breakpoints(breakpoints()),
        &config(),
    )
    .unwrap();
    let full = run(&scenario, &config());

    assert_eq!(filtered.markers(), full.markers());
    assert_eq!(filtered.path(1.0), full.path(1.0));
    assert_ne!(filtered.path(0.5), full.path(0.5));
}
