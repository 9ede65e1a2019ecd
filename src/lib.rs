#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations)]

#[macro_use]
pub(crate) mod util;
pub(crate) mod loom;

pub mod executor;
pub mod tcpip;
pub mod time;

#[doc(inline)]
pub use self::{
    tcpip::{after_func, TcpipTimer},
    time::{Clock, Setting, Timer, TimerListener, VirtualClock},
};
