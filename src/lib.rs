// MIT License
//
// Copyright (c) 2025 Takatoshi Kondo
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Session and protocol core of an MQTT 3.1.1 / 5.0 broker.
//!
//! Decoded packets arrive from [`endpoint::Endpoint`]s, are dispatched by the
//! [`context::Context`] onto a fixed worker pool (one worker per connection,
//! so per-client order is kept) and handled by the [`processor::Processor`],
//! which drives the connection lifecycle, subscriptions, retained messages,
//! QoS handshakes and will delivery.

pub mod acceptor;
pub mod auth;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod endpoint;
pub mod endpoint_registry;
pub mod inflight;
pub mod packet;
pub mod processor;
pub mod retained_store;
pub mod router;
pub mod session;
pub mod session_store;
pub mod topic_filter;
pub mod topic_registry;
pub mod tracing_setup;

pub use context::Context;
