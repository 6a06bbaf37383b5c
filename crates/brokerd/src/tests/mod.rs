//! Test suites for the broker: bootstrap, the request pipeline over real
//! sockets, and process supervision.

mod support;
