use std::sync::Arc;
use std::time::Duration;

use reactor_engine::DocumentModelRegistry;
use reactor_engine::JobInfo;
use reactor_engine::MergeReducer;
use reactor_engine::Reactor;
use reactor_engine::ReactorBuilder;
use reactor_engine::Settings;

pub const TEST_DOC_TYPE: &str = "test/doc";

/// In-memory reactor with the merge reducer registered for the test
/// document type.
pub fn build_reactor() -> Arc<Reactor> {
    let registry = Arc::new(DocumentModelRegistry::new());
    registry.register(TEST_DOC_TYPE, Arc::new(MergeReducer));
    ReactorBuilder::new(Settings::default())
        .registry(registry)
        .build()
        .expect("reactor builds")
}

pub async fn await_job(reactor: &Reactor, info: JobInfo) -> JobInfo {
    tokio::time::timeout(Duration::from_secs(5), reactor.wait_for_job(&info.id, None))
        .await
        .expect("job did not settle in time")
        .expect("job resolved")
}

/// Polls until `check` passes or the deadline hits.
pub async fn eventually<F, Fut>(
    deadline: Duration,
    mut check: F,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if check().await {
            return true;
        }
        if start.elapsed() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
