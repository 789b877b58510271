//! Bounded quasi-Newton minimization.
//!
//! Thin wrapper around argmin's L-BFGS that adds box constraints via
//! clamping plus a projected gradient, which is all the fit schedules
//! in this crate need.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use qc_core::{Error, Result};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Configuration for the bounded L-BFGS minimizer.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Maximum number of iterations
    pub max_iter: u64,
    /// Convergence tolerance for gradient norm
    pub tol: f64,
    /// Number of corrections to approximate inverse Hessian
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 1000, tol: 1e-6, m: 10 }
    }
}

/// Outcome of one minimization.
#[derive(Debug, Clone)]
pub struct MinimizeResult {
    /// Best parameters found, clamped into the bounds
    pub parameters: Vec<f64>,
    /// Objective value at the best parameters
    pub fval: f64,
    /// Number of iterations
    pub n_iter: u64,
    /// Number of objective evaluations
    pub n_fev: usize,
    /// Number of gradient evaluations
    pub n_gev: usize,
    /// Whether the solver reported convergence
    pub converged: bool,
    /// Termination message
    pub message: String,
}

impl fmt::Display for MinimizeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MinimizeResult(fval={:.6}, n_iter={}, n_fev={}, n_gev={}, converged={})",
            self.fval, self.n_iter, self.n_fev, self.n_gev, self.converged
        )
    }
}

/// Scalar objective over a parameter vector.
pub trait ObjectiveFunction: Send + Sync {
    /// Evaluate the objective at the given parameters.
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Gradient at the given parameters (numerical unless overridden).
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        // Central differences with step scaled to the parameter magnitude.
        let n = params.len();
        let mut grad = vec![0.0; n];

        for i in 0..n {
            let eps = 1e-8 * params[i].abs().max(1.0);

            let mut params_plus = params.to_vec();
            params_plus[i] += eps;
            let f_plus = self.eval(&params_plus)?;

            let mut params_minus = params.to_vec();
            params_minus[i] -= eps;
            let f_minus = self.eval(&params_minus)?;

            grad[i] = (f_plus - f_minus) / (2.0 * eps);
        }

        Ok(grad)
    }
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds.iter()).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

#[derive(Default)]
struct EvalCounts {
    cost: AtomicUsize,
    grad: AtomicUsize,
}

/// Adapter between [`ObjectiveFunction`] and the argmin solver traits.
struct ClampedProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    bounds: &'a [(f64, f64)],
    counts: Arc<EvalCounts>,
}

impl<'a> CostFunction for ClampedProblem<'a> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.counts.cost.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        self.objective.eval(&clamped).map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

impl<'a> Gradient for ClampedProblem<'a> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        params: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.counts.grad.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        let mut g = self
            .objective
            .gradient(&clamped)
            .map_err(|e| argmin::core::Error::msg(e.to_string()))?;

        // Projected gradient: at an active bound, zero any component that
        // points further outside. Without this the line search keeps stepping
        // into the flat clamped region and never converges. A degenerate
        // bound (lo == hi) zeroes the component from both sides and pins the
        // parameter, which is how fit stages fix parameters.
        const EPS: f64 = 1e-12;
        for (i, (&x, &(lo, hi))) in clamped.iter().zip(self.bounds.iter()).enumerate() {
            if x <= lo + EPS && g[i] > 0.0 {
                g[i] = 0.0;
            }
            if x >= hi - EPS && g[i] < 0.0 {
                g[i] = 0.0;
            }
        }

        Ok(g)
    }
}

/// L-BFGS with box constraints.
pub struct BoundedLbfgs {
    config: OptimizerConfig,
}

impl BoundedLbfgs {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Minimize the objective inside the given box.
    ///
    /// `bounds` gives (lower, upper) per parameter; infinite limits leave a
    /// side open and `lo == hi` pins the parameter at that value. The initial
    /// point is clamped into the box before the first iteration.
    pub fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init_params: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<MinimizeResult> {
        if init_params.len() != bounds.len() {
            return Err(Error::Validation(format!(
                "Parameter and bounds length mismatch: {} != {}",
                init_params.len(),
                bounds.len()
            )));
        }
        for (i, &(lo, hi)) in bounds.iter().enumerate() {
            if !(lo <= hi) {
                return Err(Error::Validation(format!(
                    "Invalid bounds for parameter {i}: ({lo}, {hi})"
                )));
            }
        }

        let init_clamped = clamp_params(init_params, bounds);

        let counts = Arc::new(EvalCounts::default());
        let problem = ClampedProblem { objective, bounds, counts: counts.clone() };

        let linesearch = MoreThuenteLineSearch::new();
        // Argmin's default cost tolerance is ~EPS, far too strict for
        // chi-square values that run into the thousands on bright channels.
        let tol_cost =
            if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-12) };
        let solver = LBFGS::new(linesearch, self.config.m)
            .with_tolerance_grad(self.config.tol)
            .map_err(|e| {
                Error::Validation(format!("Invalid optimizer configuration (tol): {e}"))
            })?;
        let solver = solver.with_tolerance_cost(tol_cost).map_err(|e| {
            Error::Validation(format!("Invalid optimizer configuration (tol_cost): {e}"))
        })?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(init_clamped).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| Error::Validation(format!("Optimization failed: {}", e)))?;

        let state = res.state();
        let best_params_unclamped = state
            .get_best_param()
            .ok_or_else(|| Error::Validation("No best parameters found".to_string()))?
            .clone();
        let best_params = clamp_params(&best_params_unclamped, bounds);
        let fval = state.get_best_cost();
        let n_iter = state.get_iter();
        let n_fev = counts.cost.load(Ordering::Relaxed);
        let n_gev = counts.grad.load(Ordering::Relaxed);

        let termination = state.get_termination_status();
        let converged = matches!(
            termination,
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
                | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
        );
        let message = termination.to_string();

        Ok(MinimizeResult {
            parameters: best_params,
            fval,
            n_iter,
            n_fev,
            n_gev,
            converged,
            message,
        })
    }
}

impl Default for BoundedLbfgs {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // f(x, y) = (x - 1.5)^2 + (y + 0.5)^2, minimum at (1.5, -0.5).
    struct Paraboloid;

    impl ObjectiveFunction for Paraboloid {
        fn eval(&self, params: &[f64]) -> Result<f64> {
            let x = params[0];
            let y = params[1];
            Ok((x - 1.5).powi(2) + (y + 0.5).powi(2))
        }

        fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
            let x = params[0];
            let y = params[1];
            Ok(vec![2.0 * (x - 1.5), 2.0 * (y + 0.5)])
        }
    }

    #[test]
    fn test_minimize_paraboloid() {
        let config = OptimizerConfig { max_iter: 100, tol: 1e-6, m: 10 };
        let optimizer = BoundedLbfgs::new(config);

        let init = vec![0.0, 0.0];
        let bounds = vec![(-10.0, 10.0), (-10.0, 10.0)];

        let result = optimizer.minimize(&Paraboloid, &init, &bounds).unwrap();

        assert!(result.converged, "should converge: {}", result.message);
        assert_relative_eq!(result.parameters[0], 1.5, epsilon = 1e-4);
        assert_relative_eq!(result.parameters[1], -0.5, epsilon = 1e-4);
        assert_relative_eq!(result.fval, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_minimize_converges_at_active_bound() {
        // Unconstrained minimum (1.5, -0.5) lies outside the box, the
        // constrained optimum sits on the corner (2, 0).
        let optimizer = BoundedLbfgs::default();

        let init = vec![4.0, 3.0];
        let bounds = vec![(2.0, 6.0), (0.0, 5.0)];

        let result = optimizer.minimize(&Paraboloid, &init, &bounds).unwrap();

        assert_relative_eq!(result.parameters[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(result.parameters[1], 0.0, epsilon = 1e-6);
        assert!(
            result.converged,
            "should converge at the bound, not hit MaxIter: {}",
            result.message
        );
    }

    #[test]
    fn test_degenerate_bounds_pin_parameter() {
        let optimizer = BoundedLbfgs::default();

        // y is pinned at 2.0, x still free.
        let init = vec![0.0, 2.0];
        let bounds = vec![(-10.0, 10.0), (2.0, 2.0)];

        let result = optimizer.minimize(&Paraboloid, &init, &bounds).unwrap();

        assert!(result.converged, "should converge: {}", result.message);
        assert_relative_eq!(result.parameters[0], 1.5, epsilon = 1e-4);
        assert_relative_eq!(result.parameters[1], 2.0, epsilon = 1e-12);
        // f(1.5, 2) = (2 + 0.5)^2
        assert_relative_eq!(result.fval, 6.25, epsilon = 1e-6);
    }

    // Coupled quadratic with no gradient override, exercises the numerical
    // differentiation path.
    struct CoupledQuadratic;

    impl ObjectiveFunction for CoupledQuadratic {
        fn eval(&self, params: &[f64]) -> Result<f64> {
            let x = params[0];
            let y = params[1];
            Ok(2.0 * (x - 1.0).powi(2) + (y - 2.0).powi(2) + 0.5 * (x - 1.0) * (y - 2.0))
        }
    }

    #[test]
    fn test_minimize_with_numerical_gradient() {
        let config = OptimizerConfig { max_iter: 500, tol: 1e-6, m: 10 };
        let optimizer = BoundedLbfgs::new(config);

        let init = vec![-3.0, 7.0];
        let bounds = vec![(-10.0, 10.0), (-10.0, 10.0)];

        let result = optimizer.minimize(&CoupledQuadratic, &init, &bounds).unwrap();

        assert_relative_eq!(result.parameters[0], 1.0, epsilon = 1e-3);
        assert_relative_eq!(result.parameters[1], 2.0, epsilon = 1e-3);
        assert!(result.fval < 1e-6);
        assert!(result.n_gev > 0);
    }

    #[test]
    fn test_minimize_rejects_inverted_bounds() {
        let optimizer = BoundedLbfgs::default();
        let err = optimizer.minimize(&Paraboloid, &[0.0, 0.0], &[(1.0, -1.0), (0.0, 1.0)]);
        assert!(err.is_err());
    }

    #[test]
    fn test_minimize_rejects_length_mismatch() {
        let optimizer = BoundedLbfgs::default();
        let err = optimizer.minimize(&Paraboloid, &[0.0, 0.0], &[(0.0, 1.0)]);
        assert!(err.is_err());
    }
}
