pub mod assert;
