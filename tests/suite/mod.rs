mod activity;
mod session;
