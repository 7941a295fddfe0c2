//! cartplan-ingest: flat-file snapshots in, plugging and forecast records out.

pub mod export;
pub mod parsers;
pub mod types;

pub use export::{
    render_forecast, render_plugging, render_probabilities, write_forecast, write_forecast_json,
    write_plate_list, write_plugging,
};
pub use parsers::observing_plan::{load_block_plan, parse_blocks};
pub use parsers::plate_list::{parse_plate_list, read_plate_list};
pub use parsers::snapshot::{
    assemble, load_cart_states, load_exposures, load_plates, load_snapshot, mount_plates,
};
pub use types::{BlockRow, CartRow, ExposureRow, PlateRow};
