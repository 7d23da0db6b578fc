//! Grasp generator benchmark.
//!
//! For each product, the shelf is loaded with one instance of it in every
//! bin and a grasp is requested in each bin. The per-product success rates
//! and the total time are appended to a CSV run log: one header row of
//! product names plus `total_time`, then one row of percentages plus seconds.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::PickResult;
use crate::orchestrator::choose_arm;
use crate::pose::{Pose, compose_global};
use crate::services::Collaborators;
use crate::shelf::{Bin, Shelf, ShelfLayout};
use crate::types::ProductName;

/// File name of the run log inside the log directory.
pub const BENCHMARK_LOG: &str = "grasping_test.csv";

#[derive(Debug, Clone, Serialize)]
pub struct ProductScore {
    pub product: ProductName,
    pub attempts: usize,
    pub successes: usize,
}

impl ProductScore {
    /// Success rate in percent.
    pub fn rate(&self) -> f64 {
        percent(self.successes, self.attempts)
    }
}

fn percent(successes: usize, attempts: usize) -> f64 {
    if attempts == 0 {
        0.0
    } else {
        successes as f64 / attempts as f64 * 100.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub products: Vec<ProductScore>,
    pub elapsed: Duration,
}

impl BenchmarkReport {
    pub fn overall_rate(&self) -> f64 {
        let attempts = self.products.iter().map(|p| p.attempts).sum();
        let successes = self.products.iter().map(|p| p.successes).sum();
        percent(successes, attempts)
    }

    /// Header row and data row.
    pub fn to_csv(&self) -> String {
        let mut header = String::new();
        let mut row = String::new();
        for score in &self.products {
            header.push_str(score.product.as_str());
            header.push(',');
            row.push_str(&format!("{:.2},", score.rate()));
        }
        header.push_str("total_time\n");
        row.push_str(&format!("{:.3}\n", self.elapsed.as_secs_f64()));
        header + &row
    }

    /// Append both rows to `path`, creating it and its directory if needed.
    pub fn append_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(self.to_csv().as_bytes())?;
        file.flush()?;
        info!("Saved grasping data to {}", path.display());
        Ok(())
    }
}

/// Request a grasp for every product in every bin of `layout`.
///
/// `scene_pose` stands in for perception: it gives the pose of a product in
/// the frame of the bin it sits in.
pub async fn benchmark_grasps<F>(
    layout: &ShelfLayout,
    products: &[ProductName],
    dual_arm: bool,
    services: &Collaborators,
    scene_pose: F,
) -> PickResult<BenchmarkReport>
where
    F: Fn(&ProductName, &Bin) -> Pose,
{
    let start = Instant::now();
    let mut scores = Vec::with_capacity(products.len());
    let mut overall_attempts = 0;
    let mut overall_successes = 0;

    for product in products {
        info!("Loading shelf with product {}", product);
        let mut shelf = Shelf::from_layout(layout)?;
        for bin in shelf.bin_names() {
            shelf.add_product(&bin, product.clone())?;
        }

        let mut score = ProductScore {
            product: product.clone(),
            attempts: 0,
            successes: 0,
        };

        for bin in shelf.bins() {
            let Some(instance) = bin.products().first() else {
                continue;
            };
            score.attempts += 1;
            overall_attempts += 1;

            let local = scene_pose(product, bin);
            let global = compose_global(shelf.pose(), bin.pose(), &local);
            let arm = choose_arm(dual_arm, &global);
            services
                .scene
                .allow_finger_contact(&instance.collision_name(), arm);

            match services.grasps.generate_grasps(&global, arm).await {
                Ok(grasps) if !grasps.is_empty() => {
                    score.successes += 1;
                    overall_successes += 1;
                }
                Ok(_) => warn!("No grasps found for product {} in bin {}", product, bin.name()),
                Err(e) => warn!(
                    "Grasp generation failed for product {} in bin {}: {:#}",
                    product,
                    bin.name(),
                    e
                ),
            }

            info!(
                "Overall success rate: {:.1}%, product success rate: {:.1}%",
                percent(overall_successes, overall_attempts),
                score.rate()
            );
        }

        scores.push(score);
    }

    let elapsed = start.elapsed();
    info!(
        "Total time: {:.2} seconds for {} grasps",
        elapsed.as_secs_f64(),
        overall_successes
    );

    Ok(BenchmarkReport {
        products: scores,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::sim::{SimOp, SimulatedCell};
    use std::sync::Arc;

    fn center(_: &ProductName, bin: &Bin) -> Pose {
        bin.dimensions().center()
    }

    #[tokio::test]
    async fn test_every_bin_attempted() {
        let cell = Arc::new(SimulatedCell::new());
        let services = Collaborators::from_cell(cell.clone());
        let products = vec![ProductName::new("glue"), ProductName::new("stapler")];

        let report = benchmark_grasps(&ShelfLayout::default(), &products, false, &services, center)
            .await
            .unwrap();

        assert_eq!(report.products.len(), 2);
        assert_eq!(report.products[0].attempts, 12);
        assert_eq!(report.products[1].successes, 12);
        assert_eq!(report.overall_rate(), 100.0);
        assert_eq!(cell.count(SimOp::GenerateGrasps), 24);
        assert_eq!(cell.count(SimOp::AllowFingerContact), 24);
    }

    #[tokio::test]
    async fn test_no_grasps_scores_zero() {
        let cell = Arc::new(SimulatedCell::new());
        cell.set_grasp_count(0);
        let services = Collaborators::from_cell(cell.clone());

        let report = benchmark_grasps(
            &ShelfLayout::default(),
            &[ProductName::new("glue")],
            true,
            &services,
            center,
        )
        .await
        .unwrap();
        assert_eq!(report.products[0].rate(), 0.0);
        assert_eq!(report.overall_rate(), 0.0);
    }

    #[test]
    fn test_csv_rows() {
        let report = BenchmarkReport {
            products: vec![
                ProductScore {
                    product: "glue".into(),
                    attempts: 4,
                    successes: 3,
                },
                ProductScore {
                    product: "stapler".into(),
                    attempts: 4,
                    successes: 4,
                },
            ],
            elapsed: Duration::from_millis(1500),
        };
        assert_eq!(
            report.to_csv(),
            "glue,stapler,total_time\n75.00,100.00,1.500\n"
        );
    }

    #[test]
    fn test_append_creates_and_extends_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join(BENCHMARK_LOG);
        let report = BenchmarkReport {
            products: vec![ProductScore {
                product: "glue".into(),
                attempts: 1,
                successes: 1,
            }],
            elapsed: Duration::from_secs(2),
        };

        report.append_to(&path).unwrap();
        report.append_to(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written.lines().count(), 4);
        assert!(written.starts_with("glue,total_time\n100.00,2.000\n"));
    }
}
