use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::communication::Sender;
use crate::communication::test_support::run_async_test;
use crate::error::{AppError, AppResult, CommunicationError, EngineError};
use crate::protocol::{TestDescriptor, TestStatisticsDelta, WireMessage};

use super::{InvokeResult, TestRegistry, TestTarget};

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<WireMessage>>,
    fail: bool,
}

#[async_trait]
impl Sender<WireMessage> for RecordingSender {
    async fn send(&self, message: &WireMessage) -> AppResult<()> {
        if self.fail {
            return Err(AppError::communication(CommunicationError::ConnectionClosed));
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }

    fn shutdown(&self) {}
}

fn descriptor(number: u32, description: &str) -> TestDescriptor {
    TestDescriptor {
        number,
        description: description.to_owned(),
    }
}

fn registry() -> (Arc<RecordingSender>, TestRegistry) {
    let sender = Arc::new(RecordingSender::default());
    let registry = TestRegistry::new(Arc::clone(&sender) as Arc<dyn Sender<WireMessage>>);
    (sender, registry)
}

#[test]
fn registering_twice_returns_the_same_test_and_announces_once() -> AppResult<()> {
    run_async_test(async {
        let (sender, registry) = registry();
        let first = registry.register(descriptor(7, "login")).await?;
        let second = registry.register(descriptor(7, "renamed")).await?;

        if !Arc::ptr_eq(&first, &second) {
            return Err(AppError::engine("expected the existing test"));
        }
        if second.descriptor().description != "login" {
            return Err(AppError::engine("known test changed its description"));
        }
        let sent = sender.sent.lock().clone();
        if sent.len() != 1 {
            return Err(AppError::engine(format!("expected one announcement, got {sent:?}")));
        }
        if registry.tests() != [descriptor(7, "login")] {
            return Err(AppError::engine("unexpected registered tests"));
        }
        Ok(())
    })
}

#[test]
fn failed_announcement_keeps_the_test_registered() -> AppResult<()> {
    run_async_test(async {
        let sender = Arc::new(RecordingSender {
            fail: true,
            ..RecordingSender::default()
        });
        let registry = TestRegistry::new(sender as Arc<dyn Sender<WireMessage>>);
        if registry.register(descriptor(1, "search")).await.is_ok() {
            return Err(AppError::engine("expected announcement failure"));
        }
        if registry.get(1).is_none() {
            return Err(AppError::engine("test was not kept"));
        }
        Ok(())
    })
}

#[test]
fn plain_values_cannot_be_instrumented() -> AppResult<()> {
    run_async_test(async {
        let (_sender, registry) = registry();
        let test = registry.register(descriptor(3, "static")).await?;
        match test.wrap(TestTarget::Value(json!(42))) {
            Err(AppError::Engine(EngineError::NotInvokeable { kind: "number" })) => Ok(()),
            Err(err) => Err(err),
            Ok(target) => Err(AppError::engine(format!("unexpectedly wrapped {target:?}"))),
        }
    })
}

#[test]
fn invocations_are_counted_and_drained_into_a_delta() -> AppResult<()> {
    run_async_test(async {
        let (_sender, registry) = registry();
        let test = registry.register(descriptor(5, "checkout")).await?;

        let function = test.wrap(TestTarget::Function(Arc::new(|| -> InvokeResult {
            Ok(Value::from("ok"))
        })))?;
        let method = test.wrap(TestTarget::BoundMethod {
            name: "Cart.pay".to_owned(),
            call: Arc::new(|| -> InvokeResult { Err("card declined".into()) }),
        })?;

        if function.invoke()? != Value::from("ok") {
            return Err(AppError::engine("function returned the wrong value"));
        }
        function.invoke()?;
        match method.invoke() {
            Err(AppError::Engine(EngineError::InvocationFailed { test: 5, message }))
                if message == "card declined" => {}
            Err(err) => return Err(err),
            Ok(value) => {
                return Err(AppError::engine(format!("expected failure, got {value}")));
            }
        }

        let Some(WireMessage::ReportStatistics(report)) = registry.statistics_delta() else {
            return Err(AppError::engine("expected a statistics report"));
        };
        let counts: Vec<(u32, u64, u64)> = report
            .deltas
            .iter()
            .map(|delta: &TestStatisticsDelta| (delta.test, delta.successes, delta.errors))
            .collect();
        if counts != [(5, 2, 1)] {
            return Err(AppError::engine(format!("unexpected counts {counts:?}")));
        }
        if registry.statistics_delta().is_some() {
            return Err(AppError::engine("counters were not drained"));
        }
        Ok(())
    })
}
