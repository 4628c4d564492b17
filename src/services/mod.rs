// Allocation core
pub mod allocation;
pub mod allocation_policy;
pub mod preemption;
pub mod reservations;

// Guards and conversions
pub mod mapping_validator;
pub mod unit_conversion;

// Side effects
pub mod demand_status;

// External systems
pub mod erp_gateway;
