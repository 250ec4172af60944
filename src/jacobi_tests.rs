// src/jacobi_tests.rs
#![cfg(test)]
use crate::engine::SvdEngine;
use crate::error::SvdError;
use crate::jacobi::{rotate_column_pair, JacobiFactors, JacobiSvdConfig, SequentialJacobiSvd, SequentialSweep, SweepStrategy};
use approx::assert_abs_diff_eq;
use ndarray::{array, s, Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn assert_matrices_close(actual: &Array2<f64>, expected: &Array2<f64>, tolerance: f64) {
    assert_eq!(actual.dim(), expected.dim());
    for ((index, a), e) in actual.indexed_iter().zip(expected.iter()) {
        assert!((a - e).abs() < tolerance, "mismatch at {:?}: {} vs {}", index, a, e);
    }
}

fn generate_random_matrix(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-1.0..1.0))
}

mod test_rotate_column_pair {
    use super::*;

    #[test]
    fn test_orthogonal_pair_is_left_untouched() {
        let mut u = array![[1.0, 0.0], [0.0, 2.0]];
        let mut v = Array2::<f64>::eye(2);
        let (u_i, u_j) = u.multi_slice_mut((s![.., 0], s![.., 1]));
        let (v_i, v_j) = v.multi_slice_mut((s![.., 0], s![.., 1]));
        assert!(rotate_column_pair(u_i, u_j, v_i, v_j, 1e-24));
        assert_eq!(u, array![[1.0, 0.0], [0.0, 2.0]]);
        assert_eq!(v, Array2::<f64>::eye(2));
    }

    #[test]
    fn test_rotation_zeroes_inner_product_and_keeps_v_orthogonal() {
        let mut u = array![[3.0, 1.0], [1.0, 2.0], [0.5, -1.0]];
        let original = u.clone();
        let mut v = Array2::<f64>::eye(2);
        {
            let (u_i, u_j) = u.multi_slice_mut((s![.., 0], s![.., 1]));
            let (v_i, v_j) = v.multi_slice_mut((s![.., 0], s![.., 1]));
            assert!(!rotate_column_pair(u_i, u_j, v_i, v_j, 1e-24));
        }
        let d = u.column(0).dot(&u.column(1));
        assert_abs_diff_eq!(d, 0.0, epsilon = 1e-13);

        assert_matrices_close(&v.t().dot(&v), &Array2::<f64>::eye(2), 1e-14);

        // The same rotation applied to both keeps U = G·V.
        assert_matrices_close(&original.dot(&v), &u, 1e-13);
    }

    #[test]
    fn test_zero_column_counts_as_converged() {
        let mut u = array![[0.0, 1.0], [0.0, 5.0]];
        let mut v = Array2::<f64>::eye(2);
        let (u_i, u_j) = u.multi_slice_mut((s![.., 0], s![.., 1]));
        let (v_i, v_j) = v.multi_slice_mut((s![.., 0], s![.., 1]));
        assert!(rotate_column_pair(u_i, u_j, v_i, v_j, 1e-24));
    }

    #[test]
    fn test_equal_norm_columns_rotate_by_quarter_pi() {
        // a == b gives zeta = 0 and t = -1: a 45 degree rotation.
        let mut u = array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let mut v = Array2::<f64>::eye(2);
        {
            let (u_i, u_j) = u.multi_slice_mut((s![.., 0], s![.., 1]));
            let (v_i, v_j) = v.multi_slice_mut((s![.., 0], s![.., 1]));
            assert!(!rotate_column_pair(u_i, u_j, v_i, v_j, 1e-24));
        }
        let half = std::f64::consts::FRAC_1_SQRT_2;
        for &entry in v.iter() {
            assert_abs_diff_eq!(entry.abs(), half, epsilon = 1e-15);
        }
        let d = u.column(0).dot(&u.column(1));
        assert_abs_diff_eq!(d, 0.0, epsilon = 1e-15);
    }
}

mod test_sequential_sweep {
    use super::*;

    #[test]
    fn test_sweeps_reach_zero_rotations() {
        let mut work = generate_random_matrix(8, 5, 11);
        let mut v = Array2::<f64>::eye(5);
        let mut sweep = SequentialSweep;
        let mut sweeps = 0;
        while sweep.sweep(&mut work, &mut v, 1e-24) > 0 {
            sweeps += 1;
            assert!(sweeps < 50, "sequential sweep failed to settle");
        }
        for i in 0..5 {
            for j in (i + 1)..5 {
                let d = work.column(i).dot(&work.column(j));
                let a = work.column(i).dot(&work.column(i));
                let b = work.column(j).dot(&work.column(j));
                assert!(d * d <= 1e-24 * a * b, "pair ({}, {}) not orthogonal", i, j);
            }
        }
    }

    #[test]
    fn test_single_column_has_nothing_to_rotate() {
        let mut work = array![[1.0], [2.0], [3.0]];
        let mut v = Array2::<f64>::eye(1);
        assert_eq!(SequentialSweep.sweep(&mut work, &mut v, 1e-24), 0);
    }
}

mod test_config {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(JacobiSvdConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_tolerances_are_rejected() {
        let bad_configs = [
            JacobiSvdConfig { convergence_tolerance: 0.0, ..Default::default() },
            JacobiSvdConfig { singular_value_threshold: -1.0, ..Default::default() },
            JacobiSvdConfig { pseudo_inverse_threshold: f64::NAN, ..Default::default() },
            JacobiSvdConfig { rmse_tolerance: f64::INFINITY, ..Default::default() },
            JacobiSvdConfig { max_sweeps: 0, ..Default::default() },
        ];
        for config in bad_configs {
            let result = SequentialJacobiSvd::with_config(4, 4, config.clone());
            assert!(
                matches!(result, Err(SvdError::InvalidArgument { .. })),
                "config {:?} was accepted",
                config
            );
        }
    }
}

mod test_factors {
    use super::*;

    #[test]
    fn test_factor_shapes_follow_orientation() {
        let tall = JacobiFactors::for_shape(6, 4);
        assert!(!tall.is_transposed());
        assert_eq!(tall.u().dim(), (6, 4));
        assert_eq!(tall.v().dim(), (4, 4));
        assert_eq!(tall.declared_shape(), (6, 4));

        let wide = JacobiFactors::for_shape(3, 7);
        assert!(wide.is_transposed());
        assert_eq!(wide.u().dim(), (7, 3));
        assert_eq!(wide.singular_values().len(), 3);
        assert_eq!(wide.v().dim(), (3, 3));
        assert_eq!(wide.declared_shape(), (3, 7));
    }

    #[test]
    fn test_working_matrices_are_column_major() {
        let factors = JacobiFactors::for_shape(5, 3);
        assert!(factors.u().t().is_standard_layout());
        assert!(factors.v().t().is_standard_layout());
    }

    #[test]
    fn test_load_scales_by_power_of_two_and_normalize_restores_magnitude() {
        let g = array![[3e200, 0.0], [0.0, -5e199]];
        let mut factors = JacobiFactors::for_shape(2, 2);
        let scale = factors.load(&g.view());
        assert_eq!(scale, scale.log2().round().exp2());
        assert!(factors.u().iter().all(|x| x.abs() < 2.0));
        assert_eq!(factors.u()[[0, 0]] * scale, 3e200);

        factors.normalize_columns(scale, 1e-12);
        assert_abs_diff_eq!(factors.singular_values()[0] / 3e200, 1.0, epsilon = 1e-15);
        assert_abs_diff_eq!(factors.singular_values()[1] / 5e199, 1.0, epsilon = 1e-15);
        assert_abs_diff_eq!(factors.u()[[1, 1]], -1.0, epsilon = 1e-15);
    }

    #[test]
    fn test_all_zero_input_loads_with_unit_scale() {
        let g = Array2::<f64>::zeros((3, 2));
        let mut factors = JacobiFactors::for_shape(3, 2);
        assert_eq!(factors.load(&g.view()), 1.0);
        assert_eq!(factors.normalize_columns(1.0, 1e-12), 2);
        assert!(factors.singular_values().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_rank_counts_values_above_threshold() {
        let g = array![[1.0, 0.0, 0.0], [0.0, 1e-14, 0.0], [0.0, 0.0, 2.0]];
        let mut svd = SequentialJacobiSvd::new(3, 3).unwrap();
        svd.decomp(&g.view()).unwrap();
        let factors = svd.factors().unwrap();
        assert_eq!(factors.rank(1e-10), 2);
        assert_eq!(factors.rank(1e-20), 3);
    }
}

mod test_decomp_state {
    use super::*;

    #[test]
    fn test_decomp_resets_state_between_calls() {
        let mut svd = SequentialJacobiSvd::new(6, 4).unwrap();
        let first = generate_random_matrix(6, 4, 1);
        let second = generate_random_matrix(6, 4, 2);

        let sweeps_first = svd.decomp(&first.view()).unwrap();
        svd.decomp(&second.view()).unwrap();
        let reused = svd.factors().unwrap().clone();

        let mut fresh = SequentialJacobiSvd::new(6, 4).unwrap();
        let sweeps_fresh = fresh.decomp(&second.view()).unwrap();
        let fresh_factors = fresh.factors().unwrap();

        assert!(sweeps_first >= 1);
        assert_eq!(reused.sweeps(), sweeps_fresh);
        assert_eq!(reused.singular_values(), fresh_factors.singular_values());
        assert_eq!(reused.v(), fresh_factors.v());
        assert_eq!(reused.u(), fresh_factors.u());
    }

    #[test]
    fn test_failed_decomp_discards_previous_factors() {
        let mut svd = SequentialJacobiSvd::new(3, 3).unwrap();
        svd.decomp(&Array2::<f64>::eye(3).view()).unwrap();
        assert!(svd.factors().is_some());

        let mut bad = Array2::<f64>::eye(3);
        bad[[1, 2]] = f64::NAN;
        assert!(matches!(svd.decomp(&bad.view()), Err(SvdError::InvalidArgument { .. })));
        assert!(svd.factors().is_none());
        let h = Array1::<f64>::ones(3);
        assert!(matches!(svd.solve(&h.view()), Err(SvdError::NotDecomposed)));
    }

    #[test]
    fn test_sweep_cap_reports_non_convergence() {
        let config = JacobiSvdConfig { max_sweeps: 1, ..Default::default() };
        let mut svd = SequentialJacobiSvd::with_config(10, 10, config).unwrap();
        let g = generate_random_matrix(10, 10, 5);
        match svd.decomp(&g.view()) {
            Err(SvdError::DidNotConverge { sweeps }) => assert_eq!(sweeps, 1),
            other => panic!("expected DidNotConverge, got {:?}", other),
        }
        assert!(svd.factors().is_none());
    }

    #[test]
    fn test_zero_sized_shape_is_rejected() {
        assert!(matches!(SequentialJacobiSvd::new(0, 3), Err(SvdError::InvalidArgument { .. })));
        assert!(matches!(SequentialJacobiSvd::new(3, 0), Err(SvdError::InvalidArgument { .. })));
    }
}
