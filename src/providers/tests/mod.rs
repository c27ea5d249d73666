mod create_api_tests;
