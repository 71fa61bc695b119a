// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Connections, connection pools and their pollers

pub mod connection;
pub mod internal;
pub mod pollers;
pub mod pool;
pub mod transport;

pub use connection::{AsyncConnection, Connection, ConnectionInfo, ConnectionResult};
pub use internal::{InternalConnection, InternalQueues};
pub use pollers::{AsyncConnectionPool, AsyncPoller, SyncConnectionPool, SyncPoller};
pub use pool::{ConnectionPool, PoolMessage};
pub use transport::SocketConnection;
