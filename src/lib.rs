pub mod bvh;
pub mod geometry;
pub mod primitive;
pub mod traversal;
mod util;

pub use bvh::{Bvh4, Node4, Node4Mb, NodeRef, TreeError};
pub use geometry::{Ray, RayPacket};
pub use primitive::{PacketIntersector, TriangleIntersector, TrianglePrim};
pub use traversal::{intersect, occluded, DefaultConfig, TraversalConfig, TraversalStats};
