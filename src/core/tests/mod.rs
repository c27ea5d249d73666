mod messages_tests;
mod runtime_tests;
