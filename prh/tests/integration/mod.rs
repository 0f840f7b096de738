mod mock_server_tests;
mod testrun_tests;
