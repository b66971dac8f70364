pub mod browser_manager;
pub mod chat_page;
pub mod surface_scripts;

pub use browser_manager::BrowserSession;
pub use chat_page::ChatPage;
