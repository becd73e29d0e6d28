//! Wire-level types shared between `tuskd` and the client.

pub mod tus;
