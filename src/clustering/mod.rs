pub mod engine;
pub mod refine;

pub use engine::{ClusterOutcome, Clusterer, generate_group_name, rule_based_clusters};
