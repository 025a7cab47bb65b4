pub use super::design_files::Entity as DesignFiles;
pub use super::designs::Entity as Designs;
pub use super::download_events::Entity as DownloadEvents;
pub use super::purchases::Entity as Purchases;
pub use super::users::Entity as Users;
