pub mod backends;
pub mod info;
pub mod params;
pub mod run;
pub mod validate;
