//! Route definitions

mod loan;
mod mpesa;

pub use loan::loan_routes;
pub use mpesa::mpesa_routes;
