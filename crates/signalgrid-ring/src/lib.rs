//! signalgrid-ring — consistent hashing for instrument placement.
//!
//! Each physical node owns `V` virtual points on a 64-bit ring. A key is
//! owned by the first point clockwise from its hash; adding or removing one
//! node only relocates the keys adjacent to that node's points (about `1/N`
//! of them) instead of reshuffling everything the way modulo hashing does.
//!
//! ```text
//!        0 ──────────────── 2^64
//!        │  a:17   c:4   b:99   a:3   ...   (node:vnode)
//!        └──────── key ──▶ first point >= hash(key), wrapping
//! ```

pub mod ring;

pub use ring::{HashRing, RingPoint, hash_key};
