use anyhow::Result;
use log::{debug, info};
use std::time::{Duration, Instant};

use crate::error::ImputeError;
use crate::processing::features::{FeatureVector, PredictionTable, TrainingTable, N_FEATURES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingBudget {
    pub max_time: Duration,
    pub max_models: usize,
}

/// A regression service. Each accurate-mode sample opens its own session,
/// which is released when dropped.
pub trait RegressionBackend: Send + Sync {
    fn name(&self) -> &str;

    fn open_session(&self) -> Result<Box<dyn TrainingSession>>;
}

pub trait TrainingSession {
    fn fit(&mut self, training: &TrainingTable, budget: &TrainingBudget) -> Result<()>;

    /// One `predicted_value` per row of `table`, in row order.
    fn predict(&self, table: &PredictionTable) -> Result<Vec<f64>>;
}

/// Runs `session.predict` and rejects answers that cannot be merged back.
pub fn predict_checked(session: &dyn TrainingSession, table: &PredictionTable) -> Result<Vec<f64>> {
    if table.is_empty() {
        return Ok(Vec::new());
    }

    let predictions = session.predict(table)?;
    if predictions.len() != table.len() {
        return Err(ImputeError::training(format!(
            "trainer returned {} predictions for {} rows",
            predictions.len(),
            table.len()
        ))
        .into());
    }
    if let Some(index) = predictions.iter().position(|value| !value.is_finite()) {
        let (chromosome, start) = &table.keys[index];
        return Err(ImputeError::training(format!(
            "non-finite prediction for {}:{}",
            chromosome, start
        ))
        .into());
    }

    Ok(predictions)
}

/// Penalties tried by the built-in search, in order.
pub const RIDGE_PENALTIES: [f64; 8] = [0.0, 1e-3, 1e-2, 1e-1, 1.0, 10.0, 100.0, 1000.0];
pub const CV_FOLDS: usize = 5;
const JITTER: f64 = 1e-8;

/// Built-in backend: ridge regressions over standardized features, ranked by
/// cross-validated mean squared error.
#[derive(Debug, Clone, Default)]
pub struct RidgeSearch;

impl RegressionBackend for RidgeSearch {
    fn name(&self) -> &str {
        "ridge-search"
    }

    fn open_session(&self) -> Result<Box<dyn TrainingSession>> {
        Ok(Box::new(RidgeSession::default()))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Standardizer {
    means: FeatureVector,
    scales: FeatureVector,
}

impl Standardizer {
    fn fit(rows: &[&FeatureVector]) -> Self {
        let n = rows.len().max(1) as f64;
        let mut means = [0.0; N_FEATURES];
        for row in rows {
            for (mean, value) in means.iter_mut().zip(row.iter()) {
                *mean += value / n;
            }
        }

        let mut scales = [0.0; N_FEATURES];
        for row in rows {
            for k in 0..N_FEATURES {
                scales[k] += (row[k] - means[k]).powi(2) / n;
            }
        }
        for scale in scales.iter_mut() {
            *scale = scale.sqrt();
            if !scale.is_finite() || *scale == 0.0 {
                // constant column, contributes nothing
                *scale = 0.0;
            }
        }

        Self { means, scales }
    }

    fn apply(&self, row: &FeatureVector) -> FeatureVector {
        let mut z = [0.0; N_FEATURES];
        for k in 0..N_FEATURES {
            if self.scales[k] > 0.0 {
                z[k] = (row[k] - self.means[k]) / self.scales[k];
            }
        }
        z
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RidgeModel {
    standardizer: Standardizer,
    weights: FeatureVector,
    intercept: f64,
    pub penalty: f64,
}

impl RidgeModel {
    pub fn fit(features: &[&FeatureVector], labels: &[f64], penalty: f64) -> Result<Self> {
        if features.is_empty() || features.len() != labels.len() {
            return Err(ImputeError::training(format!(
                "cannot fit on {} feature rows and {} labels",
                features.len(),
                labels.len()
            ))
            .into());
        }

        let n = labels.len() as f64;
        let standardizer = Standardizer::fit(features);
        let intercept = labels.iter().sum::<f64>() / n;

        let mut gram = [[0.0; N_FEATURES]; N_FEATURES];
        let mut rhs = [0.0; N_FEATURES];
        for (row, label) in features.iter().zip(labels) {
            let z = standardizer.apply(row);
            let y = label - intercept;
            for a in 0..N_FEATURES {
                rhs[a] += z[a] * y;
                for b in 0..=a {
                    gram[a][b] += z[a] * z[b];
                }
            }
        }
        for a in 0..N_FEATURES {
            gram[a][a] += (penalty + JITTER) * n;
        }

        let weights = cholesky_solve(gram, rhs).ok_or_else(|| {
            ImputeError::training(format!("normal equations are singular at penalty {}", penalty))
        })?;

        Ok(Self {
            standardizer,
            weights,
            intercept,
            penalty,
        })
    }

    pub fn predict_one(&self, row: &FeatureVector) -> f64 {
        let z = self.standardizer.apply(row);
        self.intercept + z.iter().zip(self.weights.iter()).map(|(x, w)| x * w).sum::<f64>()
    }
}

/// Solves `a x = b` for symmetric positive definite `a`, of which only the
/// lower triangle is read.
fn cholesky_solve(a: [[f64; N_FEATURES]; N_FEATURES], b: FeatureVector) -> Option<FeatureVector> {
    let mut l = [[0.0; N_FEATURES]; N_FEATURES];
    for i in 0..N_FEATURES {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let diagonal = a[i][i] - sum;
                if diagonal <= 0.0 || !diagonal.is_finite() {
                    return None;
                }
                l[i][j] = diagonal.sqrt();
            } else {
                l[i][j] = (a[i][j] - sum) / l[j][j];
            }
        }
    }

    let mut y = [0.0; N_FEATURES];
    for i in 0..N_FEATURES {
        let sum: f64 = (0..i).map(|k| l[i][k] * y[k]).sum();
        y[i] = (b[i] - sum) / l[i][i];
    }

    let mut x = [0.0; N_FEATURES];
    for i in (0..N_FEATURES).rev() {
        let sum: f64 = (i + 1..N_FEATURES).map(|k| l[k][i] * x[k]).sum();
        x[i] = (y[i] - sum) / l[i][i];
    }

    x.iter().all(|v| v.is_finite()).then_some(x)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeaderboardEntry {
    pub penalty: f64,
    pub mse: f64,
}

fn cross_validate(training: &TrainingTable, folds: usize, penalty: f64) -> Result<f64> {
    let mut squared_error = 0.0;
    let mut count = 0usize;

    for fold in 0..folds {
        let (mut train_x, mut train_y) = (Vec::new(), Vec::new());
        let mut held_out = Vec::new();
        for (i, (row, label)) in training.features.iter().zip(&training.labels).enumerate() {
            if i % folds == fold {
                held_out.push((row, *label));
            } else {
                train_x.push(row);
                train_y.push(*label);
            }
        }

        let model = RidgeModel::fit(&train_x, &train_y, penalty)?;
        for (row, label) in held_out {
            squared_error += (model.predict_one(row) - label).powi(2);
            count += 1;
        }
    }

    Ok(squared_error / count.max(1) as f64)
}

#[derive(Debug, Default)]
pub struct RidgeSession {
    leader: Option<RidgeModel>,
    leaderboard: Vec<LeaderboardEntry>,
    columns: &'static [&'static str],
}

impl TrainingSession for RidgeSession {
    fn fit(&mut self, training: &TrainingTable, budget: &TrainingBudget) -> Result<()> {
        if training.is_empty() {
            return Err(ImputeError::training("no observed site survived training filters").into());
        }
        let n = training.len();
        if n < 2 {
            return Err(ImputeError::training(format!(
                "at least 2 training sites are required, got {}",
                n
            ))
            .into());
        }

        let folds = CV_FOLDS.min(n);
        let started = Instant::now();
        self.leaderboard.clear();
        self.columns = training.columns;
        debug!("Fitting on columns: {}", training.columns.join(", "));

        for (tried, &penalty) in RIDGE_PENALTIES.iter().take(budget.max_models.max(1)).enumerate() {
            if tried > 0 && started.elapsed() >= budget.max_time {
                info!("Training time budget reached after {} models", tried);
                break;
            }
            match cross_validate(training, folds, penalty) {
                Ok(mse) => self.leaderboard.push(LeaderboardEntry { penalty, mse }),
                Err(e) => debug!("Skipping penalty {}: {}", penalty, e),
            }
        }

        self.leaderboard.sort_by(|a, b| a.mse.total_cmp(&b.mse));
        let best = self
            .leaderboard
            .first()
            .copied()
            .ok_or_else(|| ImputeError::training("no candidate model could be fitted"))?;

        for (rank, entry) in self.leaderboard.iter().enumerate() {
            info!(
                "Leaderboard #{}: ridge penalty {} - cv mse {:.4}",
                rank + 1,
                entry.penalty,
                entry.mse
            );
        }

        let all_rows: Vec<&FeatureVector> = training.features.iter().collect();
        self.leader = Some(RidgeModel::fit(&all_rows, &training.labels, best.penalty)?);
        Ok(())
    }

    fn predict(&self, table: &PredictionTable) -> Result<Vec<f64>> {
        let leader = self
            .leader
            .as_ref()
            .ok_or_else(|| ImputeError::training("predict called before a model was fitted"))?;
        if table.columns != self.columns {
            return Err(ImputeError::training(format!(
                "prediction columns [{}] differ from training columns [{}]",
                table.columns.join(", "),
                self.columns.join(", ")
            ))
            .into());
        }

        Ok(table.features.iter().map(|row| leader.predict_one(row)).collect())
    }
}

impl Drop for RidgeSession {
    fn drop(&mut self) {
        debug!(
            "Releasing regression session ({} models evaluated)",
            self.leaderboard.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::features::FEATURE_COLUMNS;
    use assert_approx_eq::assert_approx_eq;

    fn row(b_meth: f64, f_meth: f64) -> FeatureVector {
        let mut row = [0.0; N_FEATURES];
        row[0] = b_meth;
        row[1] = f_meth;
        row[2] = 1.0;
        row
    }

    fn linear_training() -> TrainingTable {
        let features: Vec<FeatureVector> = (0..60)
            .map(|i| row((i % 10) as f64 * 10.0, (i % 7) as f64 * 10.0))
            .collect();
        let labels = features
            .iter()
            .map(|r| 0.5 * r[0] + 0.3 * r[1] + 5.0)
            .collect();
        TrainingTable {
            columns: &FEATURE_COLUMNS,
            features,
            labels,
        }
    }

    fn budget() -> TrainingBudget {
        TrainingBudget {
            max_time: Duration::from_secs(60),
            max_models: 3,
        }
    }

    #[test]
    fn test_ridge_recovers_linear_relation() -> Result<()> {
        let training = linear_training();
        let mut session = RidgeSearch.open_session()?;
        session.fit(&training, &budget())?;

        let mut table = PredictionTable::new();
        table.keys.push(("1".to_string(), 10));
        table.features.push(row(40.0, 20.0));

        let predictions = predict_checked(session.as_ref(), &table)?;
        assert_eq!(predictions.len(), 1);
        assert_approx_eq!(predictions[0], 0.5 * 40.0 + 0.3 * 20.0 + 5.0, 1e-3);
        Ok(())
    }

    #[test]
    fn test_leaderboard_respects_max_models() -> Result<()> {
        let mut session = RidgeSession::default();
        session.fit(&linear_training(), &budget())?;

        assert_eq!(session.leaderboard.len(), 3);
        let mses: Vec<f64> = session.leaderboard.iter().map(|e| e.mse).collect();
        assert!(mses.windows(2).all(|w| w[0] <= w[1]));
        Ok(())
    }

    #[test]
    fn test_too_few_rows_is_training_failure() {
        let training = TrainingTable {
            columns: &FEATURE_COLUMNS,
            features: vec![row(1.0, 1.0)],
            labels: vec![1.0],
        };
        let err = RidgeSession::default().fit(&training, &budget()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ImputeError>(),
            Some(ImputeError::ModelTrainingFailure(_))
        ));
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let mut table = PredictionTable::new();
        table.keys.push(("1".to_string(), 10));
        table.features.push(row(1.0, 1.0));

        assert!(predict_checked(&RidgeSession::default(), &table).is_err());
    }

    struct ShortTrainer;

    impl TrainingSession for ShortTrainer {
        fn fit(&mut self, _training: &TrainingTable, _budget: &TrainingBudget) -> Result<()> {
            Ok(())
        }

        fn predict(&self, _table: &PredictionTable) -> Result<Vec<f64>> {
            Ok(vec![1.0])
        }
    }

    #[test]
    fn test_wrong_prediction_count_rejected() {
        let mut table = PredictionTable::new();
        for start in [10, 20] {
            table.keys.push(("1".to_string(), start));
            table.features.push(row(1.0, 1.0));
        }

        let err = predict_checked(&ShortTrainer, &table).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Model training failed: trainer returned 1 predictions for 2 rows"
        );
    }

    #[test]
    fn test_prediction_columns_must_match_training() -> Result<()> {
        let mut session = RidgeSession::default();
        session.fit(&linear_training(), &budget())?;

        let mut table = PredictionTable::new();
        table.columns = &["b_meth", "f_meth"];
        table.keys.push(("1".to_string(), 10));
        table.features.push(row(40.0, 20.0));

        let err = predict_checked(&session, &table).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ImputeError>(),
            Some(ImputeError::ModelTrainingFailure(_))
        ));
        Ok(())
    }

    #[test]
    fn test_cholesky_solve_identity() {
        let mut a = [[0.0; N_FEATURES]; N_FEATURES];
        for (i, r) in a.iter_mut().enumerate() {
            r[i] = 2.0;
        }
        let b = [4.0; N_FEATURES];
        let x = cholesky_solve(a, b).unwrap();
        assert!(x.iter().all(|v| (v - 2.0).abs() < 1e-12));
    }
}
