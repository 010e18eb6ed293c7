//! Resource management
//!
//! The number of fields of view processed at once is bounded by available memory and CPU cores.
//! Memory is sampled once per run.

use byte_unit::Byte;
use sysinfo::System;
use tracing::info;

use crate::error::MaxProjError;

/// Default ratio between the estimated and the raw memory cost of one field of view.
pub const DEFAULT_SAFETY_MULTIPLIER: f64 = 5.0;

/// Where the memory figure of a [ResourceBudget] came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    /// Available memory reported by the operating system.
    Telemetry,
    /// A limit supplied by the user.
    Limit,
}

/// [crate::resource_manager::ResourceBudget] holds the memory and CPU resources of one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceBudget {
    /// Memory available to the run, in bytes.
    memory: u64,

    /// Number of logical CPU cores.
    cpus: usize,

    source: MemorySource,
}

impl ResourceBudget {
    /// Returns a new ResourceBudget with explicit figures.
    pub fn new(memory: u64, cpus: usize) -> Self {
        Self {
            memory,
            cpus: cpus.max(1),
            source: MemorySource::Limit,
        }
    }

    /// Returns the budget of this machine.
    ///
    /// A memory limit takes precedence over the available memory reported by the system.
    pub fn detect(memory_limit: Option<u64>) -> Result<Self, MaxProjError> {
        let cpus = num_cpus::get();
        if let Some(limit) = memory_limit {
            return Ok(Self::new(limit, cpus));
        }
        let mut system = System::new();
        system.refresh_memory();
        let available = system.available_memory();
        if available == 0 {
            return Err(MaxProjError::MemoryTelemetry);
        }
        Ok(Self {
            memory: available,
            cpus: cpus.max(1),
            source: MemorySource::Telemetry,
        })
    }

    /// Memory available to the run, in bytes.
    pub fn memory(&self) -> u64 {
        self.memory
    }

    /// Number of logical CPU cores.
    pub fn cpus(&self) -> usize {
        self.cpus
    }

    /// Where the memory figure came from.
    pub fn source(&self) -> MemorySource {
        self.source
    }

    /// Returns the number of fields of view to process concurrently.
    ///
    /// `memory / (per_field_bytes * safety_multiplier)`, clamped to `[1, cpus]` and never more
    /// than `total_fields`.
    ///
    /// # Arguments
    ///
    /// * `total_fields`: Number of fields of view in the run
    /// * `per_field_bytes`: Raw size of one field's sub-volume
    /// * `safety_multiplier`: Ratio of the working set of one field to its raw size
    pub fn plan(&self, total_fields: usize, per_field_bytes: usize, safety_multiplier: f64) -> usize {
        let per_worker = per_field_bytes as f64 * safety_multiplier.max(f64::MIN_POSITIVE);
        let by_memory = if per_worker > 0.0 {
            (self.memory as f64 / per_worker).floor()
        } else {
            f64::INFINITY
        };
        let upper = self.cpus.min(total_fields).max(1);
        let workers = if by_memory >= upper as f64 {
            upper
        } else {
            (by_memory as usize).max(1)
        };
        info!(
            workers,
            memory = self.memory,
            source = ?self.source,
            cpus = self.cpus,
            per_field_bytes,
            safety_multiplier,
            "Planned worker count"
        );
        workers
    }
}

/// Parse a memory size such as `512MiB` or `4 GB`.
pub fn parse_memory_size(size: &str) -> Result<u64, MaxProjError> {
    Byte::parse_str(size, /* ignore case */ true)
        .map(|bytes| bytes.as_u64())
        .map_err(|err| MaxProjError::InvalidConfig(format!("invalid memory size {:?}: {}", size, err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn memory_bound() {
        let budget = ResourceBudget::new(100 * MIB, 16);
        // 10 MiB per field x 5 = 50 MiB per worker.
        assert_eq!(2, budget.plan(100, 10 * MIB as usize, 5.0));
    }

    #[test]
    fn cpu_bound() {
        let budget = ResourceBudget::new(100_000 * MIB, 4);
        assert_eq!(4, budget.plan(100, MIB as usize, 5.0));
    }

    #[test]
    fn never_zero() {
        let budget = ResourceBudget::new(MIB, 8);
        assert_eq!(1, budget.plan(10, 100 * MIB as usize, 5.0));
    }

    #[test]
    fn never_more_than_fields() {
        let budget = ResourceBudget::new(100_000 * MIB, 64);
        assert_eq!(3, budget.plan(3, MIB as usize, 5.0));
    }

    #[test]
    fn zero_sized_fields() {
        let budget = ResourceBudget::new(MIB, 4);
        assert_eq!(4, budget.plan(10, 0, 5.0));
    }

    #[test]
    fn detect_with_limit() {
        let budget = ResourceBudget::detect(Some(42)).unwrap();
        assert_eq!(42, budget.memory());
        assert_eq!(MemorySource::Limit, budget.source());
        assert!(budget.cpus() >= 1);
    }

    #[test]
    fn parse_sizes() {
        assert_eq!(512 * MIB, parse_memory_size("512MiB").unwrap());
        assert_eq!(4_000_000_000, parse_memory_size("4 GB").unwrap());
        assert_eq!(2048, parse_memory_size("2kib").unwrap());
        assert!(parse_memory_size("lots").is_err());
    }
}
