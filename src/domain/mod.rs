// Domain layer: loan models and the ports (interfaces) the services are written against.

pub mod model;
pub mod ports;
