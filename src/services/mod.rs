pub mod advisory;
pub mod weather;

pub use advisory::ChatRiskAdvisor;
pub use weather::OpenWeatherClient;
