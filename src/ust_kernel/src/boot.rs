//! Kernel boot / shutdown (spec §9): explicit ordering — system cluster,
//! system processor(s), boot task, user cluster(s), user processor(s) — on
//! the way up; user clusters torn down in reverse creation order before the
//! system cluster, each cluster's processors joined before the next
//! cluster's teardown begins, on the way down.
//!
//! `r3`'s boot sequence is baked into its `#[r3::kernel]` attribute's
//! generated `main`, driven entirely at compile time from the static
//! configuration table (`r3_core::kernel::cfg::CfgBuilder`); this runtime
//! has no such table (see `ust_core::Config`'s doc comment), so the same
//! ordering is expressed as ordinary, dynamically callable constructor/
//! destructor methods instead of generated code.
use std::sync::Arc;

use ust_core::{Config, Priority};

use crate::cluster::Cluster;
use crate::task::Task;

/// A running instance of the runtime: one system cluster (created first,
/// torn down last) plus zero or more user clusters.
pub struct Kernel {
    config: Config,
    system_cluster: Arc<Cluster>,
    user_clusters: Vec<Arc<Cluster>>,
}

impl Kernel {
    /// Boot the kernel: create the system cluster, spawn `boot` onto it as
    /// the system cluster's first task, then start the system cluster's
    /// processors (spec §9: "system cluster, system processor, boot task" —
    /// the task is queued before the processors exist so it is guaranteed
    /// to be the first thing any of them dispatches).
    pub fn new(config: Config, boot: impl FnOnce() + Send + 'static) -> Self {
        let system_cluster = Cluster::new("system");
        let boot_task = Task::spawn("boot", Priority::NORMAL, boot);
        system_cluster.spawn_task(boot_task);
        system_cluster.add_processors(config.num_default_processors, &config);
        Self {
            config,
            system_cluster,
            user_clusters: Vec::new(),
        }
    }

    /// Create and size a user cluster (spec §9: "user cluster(s), user
    /// processor(s)", after the system cluster is already up).
    pub fn new_cluster(&mut self, name: impl Into<String>, processor_count: usize) -> Arc<Cluster> {
        let cluster = Cluster::new(name);
        cluster.add_processors(processor_count, &self.config);
        self.user_clusters.push(Arc::clone(&cluster));
        cluster
    }

    pub fn system_cluster(&self) -> &Arc<Cluster> {
        &self.system_cluster
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Tear the kernel down: user clusters in reverse creation order, then
    /// the system cluster, joining every processor thread in a cluster
    /// before moving on to tear down the next one (spec §9: "no processor
    /// outlives the ready queue it reads from").
    pub fn shutdown(mut self) {
        for cluster in self.user_clusters.drain(..).rev() {
            cluster.shutdown();
        }
        self.system_cluster.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn boot_task_runs_before_shutdown_returns() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);
        let mut config = Config::default();
        config.num_default_processors = 1;
        let kernel = Kernel::new(config, move || {
            ran2.store(true, Ordering::SeqCst);
        });
        kernel.shutdown();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn user_cluster_runs_alongside_system_cluster() {
        let done = Arc::new(AtomicBool::new(false));
        let done2 = Arc::clone(&done);
        let mut config = Config::default();
        config.num_default_processors = 1;
        let mut kernel = Kernel::new(config, || {});
        let user = kernel.new_cluster("workers", 1);
        let task = Task::spawn("w", Priority::NORMAL, move || {
            done2.store(true, Ordering::SeqCst);
        });
        user.spawn_task(task);
        kernel.shutdown();
        assert!(done.load(Ordering::SeqCst));
    }
}
