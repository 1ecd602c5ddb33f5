mod admin;
mod bank;
mod helpers;
mod mocks;
mod status;
