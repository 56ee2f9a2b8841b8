// Upload transport abstraction — binary PUT against signed storage URLs with progress events.

pub mod http_transport;
pub mod traits;
