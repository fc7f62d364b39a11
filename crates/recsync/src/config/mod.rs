pub mod loader;
pub mod schema;

pub use loader::{load_settings, load_settings_from_str};
pub use schema::{
    BudgetSettings, CadenceSettings, ClassifierSettings, Environment, ExtractSettings,
    MoneySettings, PreviewSettings, ProviderSettings, RetrySettings, SyncSettings, WindowSettings,
};
