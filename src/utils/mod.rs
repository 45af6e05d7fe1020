pub mod file_detection;
pub mod language;

#[cfg(test)]
pub mod test_helpers;
