// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Concurrency limits applied around each call.

mod bulkhead;
mod worker_pool;

pub(crate) use bulkhead::Bulkhead;
pub(crate) use worker_pool::WorkerPool;
