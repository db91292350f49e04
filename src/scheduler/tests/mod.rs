mod context;
mod timing;
