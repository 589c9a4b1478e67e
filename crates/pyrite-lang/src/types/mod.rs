pub mod binop_registry;
pub mod methods;
