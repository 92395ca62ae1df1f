// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

use std::process;

use clap::Parser;
use worker::App;

fn main() {
    pretty_env_logger::init();
    let app = App::parse();
    if let Err(err) = app.exec() {
        log::error!("{err}");
        process::exit(1);
    }
}
