//! Label-based container resolution.

use std::sync::Arc;

use reelkeeper::record::ExecutionId;
use reelkeeper::resolver::ContainerResolver;

use crate::fake_runtime::FakeRuntime;

#[tokio::test]
async fn resolves_container_by_execution_label() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.add_container("aaa111", "execution_id", "exec-1");
    runtime.add_container("bbb222", "execution_id", "exec-2");
    let resolver = ContainerResolver::new(runtime.clone(), "execution_id");

    let found = resolver.resolve(&ExecutionId::from_raw("exec-2")).await;

    assert_eq!(found.as_deref(), Some("bbb222"));
    assert!(runtime
        .calls()
        .contains(&"list:execution_id=exec-2".to_owned()));
}

#[tokio::test]
async fn stopped_containers_still_resolve() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.add_container("ccc333", "execution_id", "exec-3");
    runtime.exit("ccc333");
    let resolver = ContainerResolver::new(runtime, "execution_id");

    let found = resolver.resolve(&ExecutionId::from_raw("exec-3")).await;
    assert_eq!(found.as_deref(), Some("ccc333"));
}

#[tokio::test]
async fn unknown_execution_id_resolves_to_none() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.add_container("aaa111", "execution_id", "exec-1");
    let resolver = ContainerResolver::new(runtime, "execution_id");

    assert!(resolver
        .resolve(&ExecutionId::from_raw("exec-9"))
        .await
        .is_none());
}

#[tokio::test]
async fn custom_label_key_is_used() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.add_container("aaa111", "run_id", "exec-1");
    let resolver = ContainerResolver::new(runtime, "run_id");

    assert_eq!(resolver.label_key(), "run_id");
    let found = resolver.resolve(&ExecutionId::from_raw("exec-1")).await;
    assert_eq!(found.as_deref(), Some("aaa111"));
}

#[tokio::test]
async fn runtime_failure_degrades_to_none() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.add_container("aaa111", "execution_id", "exec-1");
    runtime.set_unreachable(true);
    let resolver = ContainerResolver::new(runtime, "execution_id");

    assert!(resolver
        .resolve(&ExecutionId::from_raw("exec-1"))
        .await
        .is_none());
}
