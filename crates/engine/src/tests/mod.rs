mod helpers;

mod column_family_tests;
mod metadata_tests;
mod properties_tests;
mod read_tests;
mod repair_tests;
mod secondary_tests;
mod write_tests;
