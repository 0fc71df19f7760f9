//! Spatial partitioning: subzones, zones, and areas.
//!
//! The map of every location is partitioned into fixed-size subzone
//! rectangles, the unit of loading. Visibility is computed over zones,
//! transient 3×3 subzone windows around a point. Areas are user-defined
//! receiver shapes (a chat hearing disk, say) resolved against loaded
//! subzones.

pub mod area;
pub mod atlas;
pub mod subzone;
pub mod zone;

pub use area::{Area, AreaError, AreaFactory, Disk};
pub use atlas::Atlas;
pub use subzone::Subzone;
pub use zone::Zone;
