//! FilePageLoader - Implementação do PageLoader que lê a imagem executável
//! direto de um arquivo no sistema de arquivos.
//!
//! Diferente de um swap file, aqui o arquivo é somente leitura: a MMU nunca
//! escreve de volta na imagem, páginas modificadas vão para o swap.
//!
//! A imagem pode começar com um header arbitrário (por exemplo o header de um
//! executável); nesse caso o `AddressSpace` é criado com
//! `with_image_offset(tamanho_do_header)` e o endereço virtual 0 passa a
//! corresponder ao primeiro byte depois dele.
//!
//! | descrição         | tamanho                  |
//! |-------------------|--------------------------|
//! | header (opcional) | image_offset bytes       |
//! | página 0          | page_size bytes          |
//! | página 1          | page_size bytes          |
//! | ...               | ...                      |
//! | página N          | até page_size bytes      |
//!
//! A última página pode ser curta; o pager completa o resto do frame com 0.

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::Path,
};

use vmm::PageLoader;

/// O carregador que lê do arquivo.
#[derive(Debug)]
pub struct FilePageLoader {
    /// O arquivo fonte.
    file: File,
    /// Tamanho do arquivo, lido uma vez na abertura.
    len: usize,
}

impl FilePageLoader {
    /// Abre a imagem para leitura.
    pub fn new<P: AsRef<Path>>(filename: &P) -> io::Result<FilePageLoader> {
        let file = File::open(filename)?;
        let len = file.metadata()?.len() as usize;

        Ok(FilePageLoader { file, len })
    }
}

impl PageLoader for FilePageLoader {
    fn len(&self) -> usize {
        self.len
    }

    fn read_at(&mut self, target: &mut [u8], file_offset: usize) -> io::Result<usize> {
        if file_offset >= self.len {
            return Ok(0);
        }

        self.file.seek(SeekFrom::Start(file_offset as u64))?;

        // `read` pode devolver menos bytes do que pedimos mesmo no meio do
        // arquivo, então lemos até encher o buffer ou chegar no fim.
        let mut total = 0;

        while total < target.len() {
            match self.file.read(&mut target[total..])? {
                0 => break,
                n => total += n,
            }
        }

        Ok(total)
    }
}
