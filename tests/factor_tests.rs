//! Integration tests for factorization and the iterative solver.

use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sparseqp::{
    cholesky, icc, CsrMatrix, Gmres, GmresSettings, InsertMode, Permutation, SolverRegistry,
};

/// Random sparse symmetric positive definite matrix: random symmetric
/// pattern made diagonally dominant.
fn random_spd(rng: &mut StdRng, n: usize, density: f64) -> CsrMatrix {
    let mut dense = vec![vec![0.0f64; n]; n];
    for i in 0..n {
        for j in i + 1..n {
            if rng.gen_bool(density) {
                let v = rng.gen_range(-1.0..1.0);
                dense[i][j] = v;
                dense[j][i] = v;
            }
        }
    }
    for i in 0..n {
        let offsum: f64 = dense[i].iter().map(|v| v.abs()).sum();
        dense[i][i] = offsum + rng.gen_range(1.0..2.0);
    }
    let mut a = CsrMatrix::with_uniform_nnz(n, n, n).unwrap();
    for i in 0..n {
        for j in 0..n {
            if dense[i][j] != 0.0 {
                a.set_value(i, j, dense[i][j], InsertMode::Insert).unwrap();
            }
        }
    }
    a.assembly_end();
    a
}

#[test]
fn direct_solve_recovers_known_solution() {
    let mut rng = StdRng::seed_from_u64(101);
    let n = 25;
    let a = random_spd(&mut rng, n, 0.2);
    let x_true: Vec<f64> = (0..n).map(|_| rng.gen_range(-2.0..2.0)).collect();
    let mut b = vec![0.0; n];
    a.mult(&x_true, &mut b).unwrap();

    let mut factor = cholesky(&a, &Permutation::identity(n), 5.0).unwrap();
    let mut x = vec![0.0; n];
    factor.solve(&b, &mut x).unwrap();
    for (u, v) in x.iter().zip(&x_true) {
        assert_relative_eq!(u, v, epsilon = 1e-9);
    }
}

#[test]
fn permuted_direct_solve_agrees() {
    let mut rng = StdRng::seed_from_u64(202);
    let n = 12;
    let a = random_spd(&mut rng, n, 0.3);
    let mut order: Vec<usize> = (0..n).collect();
    // Fisher-Yates with the seeded generator.
    for i in (1..n).rev() {
        let j = rng.gen_range(0..=i);
        order.swap(i, j);
    }
    let perm = Permutation::new(order).unwrap();

    let b: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let mut natural = cholesky(&a, &Permutation::identity(n), 5.0).unwrap();
    let mut permuted = cholesky(&a, &perm, 5.0).unwrap();
    let mut x1 = vec![0.0; n];
    let mut x2 = vec![0.0; n];
    natural.solve(&b, &mut x1).unwrap();
    permuted.solve(&b, &mut x2).unwrap();
    for (u, v) in x1.iter().zip(&x2) {
        assert_relative_eq!(u, v, epsilon = 1e-9);
    }
}

#[test]
fn incomplete_factor_residual_shrinks_with_levels() {
    let mut rng = StdRng::seed_from_u64(303);
    let n = 30;
    let a = random_spd(&mut rng, n, 0.15);
    let x_true: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let mut b = vec![0.0; n];
    a.mult(&x_true, &mut b).unwrap();

    let residual_at = |levels: usize| -> f64 {
        let (mut f, _) = icc(&a, &Permutation::identity(n), levels, 3.0).unwrap();
        let mut x = vec![0.0; n];
        f.solve(&b, &mut x).unwrap();
        let mut ax = vec![0.0; n];
        a.mult(&x, &mut ax).unwrap();
        ax.iter()
            .zip(&b)
            .map(|(u, v)| (u - v) * (u - v))
            .sum::<f64>()
            .sqrt()
    };
    let r0 = residual_at(0);
    let r_full = residual_at(n);
    assert!(r_full < 1e-8);
    assert!(r_full <= r0 + 1e-9);
}

#[test]
fn icc_info_reports_fill() {
    let mut rng = StdRng::seed_from_u64(404);
    let a = random_spd(&mut rng, 20, 0.2);
    let (_, info0) = icc(&a, &Permutation::identity(20), 0, 1.0).unwrap();
    assert_relative_eq!(info0.fill_needed, 1.0);
    let (_, info_full) = icc(&a, &Permutation::identity(20), 20, 1.0).unwrap();
    assert!(info_full.fill_needed >= info0.fill_needed);
}

#[test]
fn gmres_and_cholesky_agree_on_spd() {
    let mut rng = StdRng::seed_from_u64(505);
    let n = 15;
    let a = random_spd(&mut rng, n, 0.25);
    let b: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();

    let registry = SolverRegistry::with_builtins();
    let mut xs = Vec::new();
    for name in ["cholesky", "gmres"] {
        let mut solver = registry.create(name).unwrap();
        solver.prepare(&a).unwrap();
        let mut x = vec![0.0; n];
        solver.solve(&a, &b, &mut x).unwrap();
        xs.push(x);
    }
    for (u, v) in xs[0].iter().zip(&xs[1]) {
        assert_relative_eq!(u, v, epsilon = 1e-7);
    }
}

#[test]
fn gmres_reports_budget_exhaustion_without_failing() {
    let mut rng = StdRng::seed_from_u64(606);
    let n = 40;
    let a = random_spd(&mut rng, n, 0.2);
    let b: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let settings = GmresSettings {
        restart: 2,
        max_iterations: 3,
        rtol: 1.0e-14,
        atol: 1.0e-50,
    };
    let mut gmres = Gmres::new(n, settings);
    let mut x = vec![0.0; n];
    let out = gmres.solve(&a, &b, &mut x).unwrap();
    assert!(!out.converged);
    assert_eq!(out.iterations, 3);
    assert!(out.residual_norm.is_finite());
}
