pub mod sim;
pub mod table;

#[cfg(feature = "stm32g0")]
pub mod stm32g0;
