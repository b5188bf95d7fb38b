// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared helpers for integration tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use flotilla::time::Clock;
use flotilla::{
    CancelToken, OrderedReplicas, Replica, ReplicaOrdering, ReplicaResult, ReplicaStorageContainer, Request,
    RequestParameters, Response, ResponseCode, Transport,
};
use futures::future::BoxFuture;

/// A transport that replies per replica host with a scripted latency and
/// code, recording the order in which replicas were contacted.
pub struct ScriptedTransport {
    clock: Clock,
    scripts: Mutex<HashMap<String, (Duration, u16)>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Scripts the reply of one replica host.
    pub fn script(&self, host: &str, latency: Duration, code: u16) {
        self.scripts
            .lock()
            .expect("scripts lock")
            .insert(host.to_string(), (latency, code));
    }

    /// The replica hosts contacted so far, in launch order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        request: Request,
        _connect_timeout: Option<Duration>,
        _timeout: Duration,
        cancel: CancelToken,
    ) -> BoxFuture<'_, Response> {
        let host = request.uri().host().unwrap_or("<relative>").to_string();
        self.calls.lock().expect("calls lock").push(host.clone());

        let (latency, code) = self
            .scripts
            .lock()
            .expect("scripts lock")
            .get(&host)
            .copied()
            .unwrap_or((Duration::ZERO, 200));

        Box::pin(async move {
            self.clock.delay(latency).await;
            if cancel.is_cancelled() {
                Response::canceled()
            } else {
                Response::new(ResponseCode::from_u16(code))
            }
        })
    }

    fn supports(&self, _capability: flotilla::Capability) -> bool {
        true
    }
}

/// Orders replicas exactly as the provider listed them. Keeps scenario
/// tests independent of random draws.
#[derive(Debug, Default)]
pub struct FifoOrdering;

impl ReplicaOrdering for FifoOrdering {
    fn order(
        &self,
        replicas: &[Replica],
        _storage: &ReplicaStorageContainer,
        _request: &Request,
        _parameters: &RequestParameters,
    ) -> OrderedReplicas {
        OrderedReplicas::new(replicas.to_vec().into_iter())
    }

    fn learn(&self, _result: &ReplicaResult, _storage: &ReplicaStorageContainer) {}
}

/// A provider over parsed URLs; panics on bad input because tests own it.
pub fn cluster(urls: &[&str]) -> flotilla::FixedClusterProvider {
    flotilla::FixedClusterProvider::from_urls(urls).expect("test cluster URLs parse")
}
