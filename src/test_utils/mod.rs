//! Fakes and builders shared by the unit tests.
mod entry_builder;
mod fakes;

pub(crate) use entry_builder::*;
pub(crate) use fakes::*;

use std::net::IpAddr;

pub(crate) fn ip(text: &str) -> IpAddr {
    text.parse().unwrap()
}

/// Let spawned resolution tasks run on a current-thread test runtime.
pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
