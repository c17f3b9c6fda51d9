//! Behavioural suites exercising the controller against real child processes.
