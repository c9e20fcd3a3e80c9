mod error;
mod inventory;
mod types;

pub mod prelude {
    pub use crate::error::CallError;
    pub use crate::inventory::{ClientOptions, InventoryClient};
    pub use crate::types::{
        Credentials, InventoryState, LoginResponse, OrderId, OrderItem, OrderRequest,
        OrderResponse,
    };
}
