#![cfg_attr(not(feature = "std"), no_std)]

//! External collaborators the buddy allocator core serves, kept only to
//! the depth needed to exercise its contracts (`spec.md` §1): a
//! round-robin thread scheduler whose TCBs live in pages obtained from
//! `los_hal`, and the `ls`-device directory-listing cache.

extern crate alloc;

pub mod devfs;
pub mod logger;
pub mod task;
