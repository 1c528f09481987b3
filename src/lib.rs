// cel-engine: a Common Expression Language execution engine.
//
// Copyright (C) 2019  Brandon Lewis
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.

extern crate regex;
extern crate serde;
#[macro_use]
extern crate lazy_static;

pub mod activation;
pub mod ast;
pub mod attribute;
pub mod comprehension;
pub mod descriptor;
pub mod env;
pub mod evaluator;
pub mod frame;
pub mod options;
pub mod parser;
pub mod planner;
pub mod registry;
pub mod trace;
pub mod typechecker;
pub mod value;

