pub mod demand_line;
pub mod demand_order;
pub mod item;
pub mod item_unit_conversion;
pub mod lot;
pub mod reservation;
pub mod reservation_history;
