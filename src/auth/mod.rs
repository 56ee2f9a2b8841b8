// Session credentials and the signed-in user.

pub mod session;
pub mod token;
