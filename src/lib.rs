pub mod sd;
