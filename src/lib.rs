//! # simple_db - a single-table in-memory database service
//!
//! Clients send small SQL statements; the service parses them, runs them
//! against a shared in-memory record store and sends the result back in
//! bounded-size chunks.
//!
//! ## Architecture Overview
//!
//! 1. **Server Layer** (`server` module): TCP connections, one requester per client
//! 2. **SQL Layer** (`sql` module): statement text to [`engine::Query`]
//! 3. **Dispatch Layer** (`dispatcher` module): bounded intake, worker pool, chunked responses
//! 4. **Engine Layer** (`engine` module): record store, constraint evaluation, query handlers
//!
//! ## Key Components
//!
//! - **RecordStore**: fixed slot array, one reader/writer lock per record
//! - **Executor**: select/insert/delete/update handlers holding one slot lock at a time
//! - **Dispatcher**: routes each result to its requester as a header plus chunks
//!
//! ## Usage Example
//!
//! ```bash
//! # Start the database server
//! cargo run -- --listen 127.0.0.1:8000 --capacity 100000
//!
//! # Connect and run SQL commands
//! echo "INSERT INTO people VALUES (2, 21, 180.23, 'Joe Brown');" | nc 127.0.0.1 8000
//! echo "SELECT * FROM people WHERE age >= 18;" | nc 127.0.0.1 8000
//! ```

/// Runtime configuration shared by the engine and the dispatcher
pub mod config;

/// Query intake, worker pool, and the chunked response protocol
pub mod dispatcher;

/// Record store, constraint evaluator, and query handlers
pub mod engine;

/// TCP server and client connection handling
pub mod server;

/// SQL parsing into engine queries
pub mod sql;
