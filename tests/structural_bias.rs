//! Properties of the assembled attention bias.

use graphormer::graphormer::{GraphBatch, GraphormerConfig, GraphormerModel};
use ndarray::{Array2, Array3, Axis};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config() -> GraphormerConfig {
    GraphormerConfig::new(1, 3, 2, 8, 16).without_dropout()
}

fn batch(n_graph: usize, n_node: usize) -> GraphBatch {
    GraphBatch::new(
        Array3::from_shape_fn((n_graph, n_node, 3), |(g, n, f)| (g + n * f) as f32 * 0.1),
        Array3::from_shape_fn((n_graph, n_node + 1, n_node + 1), |(g, i, j)| {
            (g as f32) * 0.5 + (i as f32) * 0.25 - (j as f32) * 0.125
        }),
        Array3::from_shape_fn((n_graph, n_node, n_node), |(_, i, j)| (i as i64 - j as i64).abs()),
    )
}

#[test]
fn disabled_channel_equals_enabled_channel_with_zero_table() {
    init_logging();
    let plain = GraphormerModel::with_seed(config(), 3).unwrap();
    let mut with_count = GraphormerModel::with_seed(config().with_num_spd(true), 3).unwrap();

    let shared: Vec<(String, _)> = plain
        .parameters()
        .names()
        .into_iter()
        .map(|name| (name.to_string(), plain.parameters().get(name).unwrap().clone()))
        .collect();
    for (name, value) in shared {
        *with_count.parameters_mut().get_mut(&name).unwrap() = value;
    }
    with_count
        .parameters_mut()
        .get_mut("num_shortest_path_encoder_weight")
        .unwrap()
        .fill(0.0);

    let b = batch(2, 3);
    let counted = b
        .clone()
        .with_num_shortest_path(Array3::from_shape_fn((2, 3, 3), |(g, i, j)| (g + i * j) as i64));

    let expected = plain.attention_bias(&b).unwrap();
    let actual = with_count.attention_bias(&counted).unwrap();
    assert_eq!(expected, actual);
}

#[test]
fn token_row_and_column_hold_virtual_distance_and_doubled_seed() {
    init_logging();
    let mut model = GraphormerModel::new(config()).unwrap();
    let t = [0.75f32, -1.5];
    model
        .parameters_mut()
        .get_mut("graph_token_virtual_distance_weight")
        .unwrap()
        .assign(&Array2::from_shape_vec((1, 2), t.to_vec()).unwrap().into_dyn());
    let table = model
        .parameters()
        .get("len_shortest_path_encoder_weight")
        .unwrap()
        .clone();

    let b = batch(2, 3);
    let bias = model.attention_bias(&b).unwrap();
    assert_eq!(bias.shape(), &[2, 2, 4, 4]);

    for g in 0..2 {
        for h in 0..2 {
            for j in 0..4 {
                let s = b.attn_bias[[g, 0, j]];
                assert!((bias[[g, h, 0, j]] - (s + t[h] + s)).abs() < 1e-6);
            }
            for i in 1..4 {
                let s = b.attn_bias[[g, i, 0]];
                assert!((bias[[g, h, i, 0]] - (s + t[h] + s)).abs() < 1e-6);
            }
            for i in 1..4 {
                for j in 1..4 {
                    let s = b.attn_bias[[g, i, j]];
                    let bucket = b.len_shortest_path[[g, i - 1, j - 1]] as usize;
                    let expected = s + table[[bucket, h]] + s;
                    assert!((bias[[g, h, i, j]] - expected).abs() < 1e-5);
                }
            }
        }
    }
}

#[test]
fn out_of_range_values_are_clamped_not_rejected() {
    init_logging();
    let model = GraphormerModel::new(
        config().with_cnb_jac(true).with_cnb_aa(true).with_degree(true),
    )
    .unwrap();

    let extreme = batch(1, 3)
        .with_undir_jac(Array3::from_elem((1, 3, 3), 5.0))
        .with_undir_aa(Array3::from_elem((1, 3, 3), -2.0))
        .with_degrees(Array2::from_elem((1, 3), 500), Array2::from_elem((1, 3), -7));
    let mut extreme = extreme;
    extreme.len_shortest_path[[0, 0, 1]] = 1000;
    extreme.len_shortest_path[[0, 1, 0]] = -1;

    let mut edge = extreme.clone();
    edge.len_shortest_path[[0, 0, 1]] = 39;
    edge.len_shortest_path[[0, 1, 0]] = 0;
    edge.undir_jac = Some(Array3::from_elem((1, 3, 3), 1.5));
    edge.undir_aa = Some(Array3::zeros((1, 3, 3)));
    edge.in_degree = Some(Array2::from_elem((1, 3), 63));
    edge.out_degree = Some(Array2::zeros((1, 3)));

    let lhs = model.forward_detailed(&extreme, Default::default()).unwrap();
    let rhs = model.forward_detailed(&edge, Default::default()).unwrap();
    assert_eq!(lhs.attn_bias, rhs.attn_bias);
    assert_eq!(lhs.input_sequence, rhs.input_sequence);
    assert_eq!(lhs.hidden, rhs.hidden);
}

#[test]
fn nan_similarity_scores_add_no_bias() {
    init_logging();
    let model = GraphormerModel::new(config().with_cnb_jac(true)).unwrap();
    let b = batch(1, 3);

    let mut scores = Array3::from_elem((1, 3, 3), 0.5f32);
    scores[[0, 0, 1]] = f32::NAN;
    let mut zeroed = scores.clone();
    zeroed[[0, 0, 1]] = 0.0;

    let with_nan = model.attention_bias(&b.clone().with_undir_jac(scores)).unwrap();
    let with_zero = model.attention_bias(&b.with_undir_jac(zeroed)).unwrap();
    assert_eq!(with_nan, with_zero);
    assert!(with_nan.iter().all(|v| v.is_finite()));
}

#[test]
fn disabled_channel_data_is_ignored() {
    init_logging();
    let model = GraphormerModel::new(config()).unwrap();
    let b = batch(1, 3);
    let extra = b
        .clone()
        .with_undir_aa(Array3::from_elem((1, 3, 3), 0.9))
        .with_degrees(Array2::from_elem((1, 3), 4), Array2::from_elem((1, 3), 2));

    let base = model.forward_detailed(&b, Default::default()).unwrap();
    let ignored = model.forward_detailed(&extra, Default::default()).unwrap();
    assert_eq!(base.attn_bias, ignored.attn_bias);
    assert_eq!(base.hidden, ignored.hidden);
}

#[test]
fn seed_bias_is_broadcast_over_heads() {
    init_logging();
    let mut model = GraphormerModel::new(config()).unwrap();
    model
        .parameters_mut()
        .get_mut("len_shortest_path_encoder_weight")
        .unwrap()
        .fill(0.0);
    model
        .parameters_mut()
        .get_mut("graph_token_virtual_distance_weight")
        .unwrap()
        .fill(0.0);

    let b = batch(2, 3);
    let bias = model.attention_bias(&b).unwrap();
    for head in bias.axis_iter(Axis(1)) {
        let doubled = &b.attn_bias * 2.0;
        for (actual, expected) in head.iter().zip(doubled.iter()) {
            assert!((actual - expected).abs() < 1e-6);
        }
    }
}
