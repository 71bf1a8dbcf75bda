//! Kernel registry.
//!
//! Kernels and their methods are registered explicitly at process start,
//! replacing load-time static initialization. The master validates run
//! descriptors against the registry; workers share the same registry
//! instance and resolve method invokers from it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::task::{TableId, WorkerId};

/// Execution context handed to a kernel method: which shard of which table
/// it is processing and on which worker it runs.
#[derive(Clone, Copy, Debug)]
pub struct KernelContext {
    pub table: TableId,
    pub shard: u32,
    pub worker: WorkerId,
}

/// What a kernel method produced: the shard's entry count after the pass
/// and how many updates it buffered for other shards.
#[derive(Clone, Copy, Debug, Default)]
pub struct KernelOutput {
    pub entries: u64,
    pub remote_updates: u64,
}

/// Boxed async method invoker.
pub type MethodFn = Arc<dyn Fn(KernelContext) -> BoxFuture<'static, KernelOutput> + Send + Sync>;

/// One registered kernel and its callable methods.
pub struct KernelInfo {
    name: String,
    methods: HashMap<String, MethodFn>,
}

impl KernelInfo {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            methods: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a method under `name`. Returns `self` so registration
    /// chains.
    pub fn method<F, Fut>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(KernelContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = KernelOutput> + Send + 'static,
    {
        let invoker: MethodFn = Arc::new(move |ctx| Box::pin(f(ctx)));
        self.methods.insert(name.to_string(), invoker);
        self
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn invoker(&self, name: &str) -> Option<MethodFn> {
        self.methods.get(name).cloned()
    }
}

/// Mapping from kernel name to its registered methods.
///
/// Built once in `main` (or test setup) and shared as an
/// `Arc<KernelRegistry>` between the master and every in-process worker.
#[derive(Default)]
pub struct KernelRegistry {
    kernels: HashMap<String, KernelInfo>,
}

impl KernelRegistry {
    pub fn register(&mut self, name: &str) -> &mut KernelInfo {
        self.kernels
            .entry(name.to_string())
            .or_insert_with(|| KernelInfo::new(name))
    }

    pub fn kernel(&self, name: &str) -> Option<&KernelInfo> {
        self.kernels.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_kernel_and_method() {
        let mut registry = KernelRegistry::default();
        registry
            .register("Crawl")
            .method("run_step", |_ctx| async { KernelOutput::default() });

        let kernel = registry.kernel("Crawl").expect("registered");
        assert!(kernel.has_method("run_step"));
        assert!(!kernel.has_method("missing"));
        assert!(registry.kernel("Nope").is_none());
    }

    #[tokio::test]
    async fn invoker_sees_its_context() {
        let mut registry = KernelRegistry::default();
        registry.register("Crawl").method("run_step", |ctx| async move {
            KernelOutput {
                entries: u64::from(ctx.shard) + 1,
                remote_updates: 0,
            }
        });

        let invoker = registry
            .kernel("Crawl")
            .and_then(|k| k.invoker("run_step"))
            .expect("invoker");
        let out = invoker(KernelContext {
            table: TableId(0),
            shard: 3,
            worker: WorkerId(0),
        })
        .await;
        assert_eq!(out.entries, 4);
    }
}
