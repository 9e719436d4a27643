mod cacert_test;
mod enroll_test;
mod errors_test;
