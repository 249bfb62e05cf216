mod engine_test;
mod postgres_test;
mod resume_test;
