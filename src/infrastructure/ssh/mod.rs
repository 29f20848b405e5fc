mod client;

pub use client::OpenSshConnector;
