//! Kubernetes access for kubegate
//!
//! This crate discovers the resource kinds a cluster serves, caches that
//! catalog, fetches and merges server-side tables and resolves the pods behind
//! workloads. Every call made on behalf of a user carries impersonation headers.

mod cache;
mod catalog;
mod client;
mod error;
pub mod impersonate;
mod jsonpath;
mod merge;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
mod pods;
mod quantity;
mod tables;

pub use cache::{CACHE_TTL, ResourceCache};
pub use catalog::{ResourceCatalog, build_catalog};
pub use client::{ClusterCredentials, KubeClient};
pub use error::GatewayError;
pub use jsonpath::JsonPathFilter;
pub use merge::{ColumnDefinition, RowFilter, TableFragment, TableMerger, TableResponse, TableResponseRow};
pub use pods::{PodResolver, format_label_selector};
pub use tables::{TABLE_ACCEPT, TableFetcher};

// Re-export types that are used in our public API
pub use kubegate_types::{FilterSpec, Identity, PodGroup, ResourceDescriptor, Table, TableRow};
