#![allow(non_snake_case)]

pub mod correction;
pub mod data;
pub mod forest;
pub mod inference;
pub mod network;
pub mod param;
pub mod permutation;
pub mod tree;
pub mod utils;

use crate::data::{ExpressionData, ExpressionSource};
use crate::forest::RandomForest;
use crate::inference::infer_network;
use crate::network::{Network, Table};
use chrono::Local;
use log::{debug, info};
use param::Param;
use std::error::Error;

/// Crate version and git hash
pub fn version() -> String {
    format!(
        "{}#{}",
        env!("CARGO_PKG_VERSION"),
        env!("GRNPERM_GIT_SHA")
    )
}

/// Load the expression matrix named in `param`, infer the network and write the
/// requested outputs.
pub fn run(param: &Param) -> Result<Network, Box<dyn Error>> {
    let mut param = param.clone();
    param::validate(&mut param)?;

    let mut data = ExpressionData::new();
    data.load_data(&param.data.X, param.data.genes_in_rows)?;
    debug!("{:?}", data);

    let network = infer_validated(&data, &param)?;

    if !param.output.pvalues.is_empty() {
        network.write_tsv(&param.output.pvalues, Table::PValues)?;
        info!("P-values written to {}", param.output.pvalues);
    }
    if !param.output.fdr.is_empty() {
        network.write_tsv(&param.output.fdr, Table::Fdr)?;
        info!("FDR written to {}", param.output.fdr);
    }
    if !param.output.save_exp.is_empty() {
        network.save_auto(&param.output.save_exp)?;
        info!("Network saved to {}", param.output.save_exp);
    }

    Ok(network)
}

/// Infer the network of an in-memory expression source. Nothing is written.
pub fn run_on_data<S: ExpressionSource + ?Sized>(source: &S, param: &Param) -> Result<Network, String> {
    let mut param = param.clone();
    param::validate(&mut param)?;
    let data = source.to_expression()?;
    infer_validated(&data, &param)
}

fn infer_validated(data: &ExpressionData, param: &Param) -> Result<Network, String> {
    let start = std::time::Instant::now();
    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();

    let regulators = data.resolve_selection(param.data.regulators.as_ref(), "regulators", 2)?;
    let targets = data.resolve_selection(param.data.targets.as_ref(), "targets", 1)?;

    let forest = RandomForest::new(param.forest.n_trees);
    let mut network = infer_network(data, &regulators, &targets, &forest, param)?;

    network.execution_time = start.elapsed().as_secs_f64();
    network.id = format!("grnperm_{}", timestamp);
    network.timestamp = timestamp;
    network.version = version();

    info!(
        "{} targets done in {:.2}s, {} failed",
        network.targets.len(),
        network.execution_time,
        network.failed_targets.len()
    );

    Ok(network)
}
