// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The request, response, and result vocabulary of the cluster client.

mod replica;
mod request;
mod response;
mod result;

pub use replica::Replica;
pub use request::{Body, Request, StreamBody};
pub use response::{Response, ResponseClass, ResponseCode, TransportVerdict};
pub use result::{ClusterResult, ClusterStatus, ReplicaResult, Verdict};
